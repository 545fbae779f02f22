//! Imposter definition builder.
//!
//! An [`ImposterDefinition`] is the JSON document POSTed to `/imposters`. It
//! always ends with a catch-all stub answering `404`; every stub added by the
//! caller is inserted in front of it. Stubs are keyed by `(method, path)`:
//! adding a stub for a key that already exists appends to that stub's
//! response queue instead of creating a second stub.

use serde::{Deserialize, Serialize};

/// Protocol of every imposter created by this crate
pub const PROTOCOL: &str = "http";

/// Status code returned by the catch-all stub
pub const CATCH_ALL_STATUS: u16 = 404;

/// `equals` predicate fields. Matching is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqualsPredicate {
    pub method: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub equals: EqualsPredicate,
}

/// Literal response returned by the imposter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubResponse {
    pub is: IsResponse,
}

impl StubResponse {
    pub fn status_code(&self) -> u16 {
        self.is.status_code
    }

    pub fn body(&self) -> Option<&str> {
        self.is.body.as_deref()
    }
}

/// A stub: the predicates a request must satisfy and the responses it cycles through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stub {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicates: Vec<Predicate>,
    pub responses: Vec<StubResponse>,
}

impl Stub {
    fn catch_all() -> Self {
        Self {
            predicates: Vec::new(),
            responses: vec![StubResponse {
                is: IsResponse {
                    status_code: CATCH_ALL_STATUS,
                    body: None,
                },
            }],
        }
    }

    /// Whether this stub is keyed on exactly this method and path
    pub fn is_keyed_on(&self, method: &str, path: &str) -> bool {
        matches!(
            self.predicates.as_slice(),
            [Predicate { equals }] if equals.method == method && equals.path == path
        )
    }

    /// Whether a request with this method and path satisfies every predicate.
    /// A stub without predicates matches everything.
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.predicates
            .iter()
            .all(|p| p.equals.method == method && p.equals.path == path)
    }
}

/// One stub addition: key, response and how many rotation slots it takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubSpec {
    method: String,
    path: String,
    body: String,
    repeat: usize,
    status: u16,
}

impl StubSpec {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            body: String::new(),
            repeat: 0,
            status: 200,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Number of consecutive rotation slots the response occupies.
    /// `0` (the default) adds a single entry.
    pub fn repeat(mut self, repeat: usize) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    fn responses(&self) -> Vec<StubResponse> {
        let response = StubResponse {
            is: IsResponse {
                status_code: self.status,
                body: Some(self.body.clone()),
            },
        };
        vec![response; self.repeat.max(1)]
    }
}

/// Mutable imposter configuration document.
///
/// Request recording is switched on so the imposter's history can be read
/// back; Rift and Mountebank (without `--mock`) keep no history otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImposterDefinition {
    protocol: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    record_requests: bool,
    stubs: Vec<Stub>,
}

impl Default for ImposterDefinition {
    fn default() -> Self {
        Self::new()
    }
}

impl ImposterDefinition {
    /// Create a definition holding only the catch-all stub
    pub fn new() -> Self {
        Self {
            protocol: PROTOCOL,
            port: None,
            record_requests: true,
            stubs: vec![Stub::catch_all()],
        }
    }

    /// Add a `200` stub returning `body` for `method path`.
    pub fn add_stub(
        &mut self,
        path: impl Into<String>,
        method: impl Into<String>,
        body: impl Into<String>,
    ) -> &mut Self {
        self.push(StubSpec::new(method, path).body(body))
    }

    /// Add a stub, merging it into an existing stub with the same key.
    pub fn push(&mut self, spec: StubSpec) -> &mut Self {
        let responses = spec.responses();
        let catch_all = self.stubs.len() - 1;

        match self.stubs[..catch_all]
            .iter()
            .position(|stub| stub.is_keyed_on(&spec.method, &spec.path))
        {
            Some(index) => self.stubs[index].responses.extend(responses),
            None => self.stubs.insert(
                catch_all,
                Stub {
                    predicates: vec![Predicate {
                        equals: EqualsPredicate {
                            method: spec.method,
                            path: spec.path,
                        },
                    }],
                    responses,
                },
            ),
        }
        self
    }

    /// Request a fixed port instead of letting the server pick one
    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.port = Some(port);
        self
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Turn the imposter's request history on or off (on by default)
    pub fn set_record_requests(&mut self, record: bool) -> &mut Self {
        self.record_requests = record;
        self
    }

    pub fn records_requests(&self) -> bool {
        self.record_requests
    }

    pub fn protocol(&self) -> &str {
        self.protocol
    }

    /// All stubs, catch-all last
    pub fn stubs(&self) -> &[Stub] {
        &self.stubs
    }

    /// Stubs added by the caller, excluding the catch-all
    pub fn user_stubs(&self) -> &[Stub] {
        &self.stubs[..self.stubs.len() - 1]
    }

    /// Number of stubs added by the caller
    pub fn stub_count(&self) -> usize {
        self.stubs.len() - 1
    }

    /// Stub keyed on `method path`, if one was added
    pub fn stub_for(&self, method: &str, path: &str) -> Option<&Stub> {
        self.user_stubs()
            .iter()
            .find(|stub| stub.is_keyed_on(method, path))
    }

    /// The document as sent to `POST /imposters`
    pub fn to_json(&self) -> serde_json::Value {
        // Only strings and integers inside, serialization cannot fail
        serde_json::to_value(self).unwrap_or_default()
    }
}
