// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template sealing boundary.
//!
//! The platform encrypts templates at rest with a primitive owned by an
//! external collaborator; the core only stores and re-emits sealed bytes.

pub trait TemplateSealer: Send + Sync {
    fn seal(&self, raw: &[u8]) -> Vec<u8>;
    fn unseal(&self, sealed: &[u8]) -> Option<Vec<u8>>;
}

/// Identity sealer used until the host wires in the real primitive.
pub struct PassthroughSealer;

impl TemplateSealer for PassthroughSealer {
    fn seal(&self, raw: &[u8]) -> Vec<u8> {
        raw.to_vec()
    }

    fn unseal(&self, sealed: &[u8]) -> Option<Vec<u8>> {
        Some(sealed.to_vec())
    }
}
