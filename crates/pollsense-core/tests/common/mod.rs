//! Shared fixtures for pollsense-core integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pollsense_core::transport::TransportResult;
use pollsense_core::{FetchConfig, HttpTransport, RawResponse, TransportError};

/// One scripted transport reply.
pub enum Reply {
    Respond(RawResponse),
    Fail(TransportError),
    /// Never completes
    Hang,
}

/// Transport replaying scripted replies in order. Once the script runs out,
/// every call fails with a connection error.
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
}

impl MockTransport {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn fetch(&self, _config: &FetchConfig) -> TransportResult<RawResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(error)) => Err(error),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(TransportError::Connection("no scripted reply".to_string())),
        }
    }
}

pub fn ok(body: &str) -> Reply {
    Reply::Respond(RawResponse::new(200, body))
}

pub fn status(code: u16, body: &str) -> Reply {
    Reply::Respond(RawResponse::new(code, body))
}

pub fn timeout() -> Reply {
    Reply::Fail(TransportError::Timeout(std::time::Duration::from_secs(15)))
}
