//! Local model of how an imposter rotates through stub responses.
//!
//! The server picks the first stub whose predicates match and answers with
//! the response under that stub's cursor, then advances the cursor, wrapping
//! at the end of the queue. [`ResponseRotation`] replays that rule against a
//! definition without a server.

use crate::definition::{ImposterDefinition, Stub, StubResponse};

/// Response a stub gives to its `k`-th matching request (1-indexed).
pub fn response_at(stub: &Stub, k: usize) -> Option<&StubResponse> {
    let count = stub.responses.len();
    if count == 0 || k == 0 {
        return None;
    }
    stub.responses.get((k - 1) % count)
}

/// Per-stub cursors over a definition's response queues
#[derive(Debug, Clone)]
pub struct ResponseRotation<'a> {
    stubs: &'a [Stub],
    cursors: Vec<usize>,
}

impl<'a> ResponseRotation<'a> {
    pub fn new(definition: &'a ImposterDefinition) -> Self {
        let stubs = definition.stubs();
        Self {
            stubs,
            cursors: vec![0; stubs.len()],
        }
    }

    /// Answer a request and advance the matched stub's cursor
    pub fn next(&mut self, method: &str, path: &str) -> Option<&'a StubResponse> {
        let stubs = self.stubs;
        let index = stubs.iter().position(|s| s.matches(method, path))?;
        self.cursors[index] += 1;
        response_at(&stubs[index], self.cursors[index])
    }

    /// Answer a request without advancing any cursor
    pub fn peek(&self, method: &str, path: &str) -> Option<&'a StubResponse> {
        let stubs = self.stubs;
        let index = stubs.iter().position(|s| s.matches(method, path))?;
        response_at(&stubs[index], self.cursors[index] + 1)
    }

    /// Rewind every cursor to the start of its queue
    pub fn reset(&mut self) {
        self.cursors.iter_mut().for_each(|c| *c = 0);
    }
}
