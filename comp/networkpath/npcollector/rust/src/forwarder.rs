// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

use std::fmt;

use async_trait::async_trait;
use log::debug;

use crate::errors::Error;

/// Event platform track an event is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    NetworkPath,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NetworkPath => "network-path",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event platform forwarder.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Send `payload`, waiting for room in the forwarder queue.
    async fn send_blocking(&self, payload: Vec<u8>, event_type: EventType) -> Result<(), Error>;
}

/// Logs payloads instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogForwarder;

#[async_trait]
impl Forwarder for LogForwarder {
    async fn send_blocking(&self, payload: Vec<u8>, event_type: EventType) -> Result<(), Error> {
        debug!(
            "[{event_type}] {}",
            String::from_utf8_lossy(&payload)
        );
        Ok(())
    }
}
