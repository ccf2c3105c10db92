//! Blob backend implementations.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};

pub mod generic;
pub mod s3;

/// Characters escaped when a key is embedded in a URL or a copy source.
pub(crate) const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');
