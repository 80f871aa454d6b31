//! Success envelope shared by the proxy handlers.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Envelope for list endpoints. `count` is always `data.len()`.
#[derive(Debug, Serialize)]
pub struct ListEnvelope<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub count: usize,
}

impl<T> ListEnvelope<T> {
    pub fn ok(data: Vec<T>) -> Self {
        Self {
            success: true,
            count: data.len(),
            data,
        }
    }
}
