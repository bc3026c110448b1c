//! Binary bytecode images.
//!
//! An image is a postcard-encoded function table behind a magic number and a
//! format version. The table holds the entry function and everything it can
//! reach, each once, and `Call` names its callee by index into the table. A
//! callee shared by many call sites is stored once, and recursive functions
//! encode like any other.
//!
//! Tagged values are stored verbatim. A native callback's word is only
//! meaningful against the registry the image is run with.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bytecode::Function;
use crate::bytecode::module::{BuildError, FuncId, FunctionDef, Module};
use crate::bytecode::verify::{VerifyError, check_reachable};

pub const MAGIC: u32 = 0x534A_4554; // "SJET"
pub const VERSION: u8 = 2;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid image magic number {0:#010x}")]
    InvalidMagic(u32),

    #[error("unsupported image version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed image: {0}")]
    Codec(#[from] postcard::Error),

    #[error("image failed verification: {0}")]
    Verify(#[from] VerifyError),

    #[error("cannot build image: {0}")]
    Build(#[from] BuildError),
}

#[derive(Serialize, Deserialize)]
struct Image {
    magic: u32,
    version: u8,
    entry: FuncId,
    functions: Vec<FunctionDef>,
}

/// Encode `function` and every function it can reach.
///
/// The entry is always stored at index 0.
pub fn encode(function: &Function) -> Result<Vec<u8>, ImageError> {
    let mut module = Module::new();
    let entry = module.import(function)?;
    let image = Image {
        magic: MAGIC,
        version: VERSION,
        entry,
        functions: module.into_definitions(),
    };
    Ok(postcard::to_allocvec(&image)?)
}

/// Decode an image and verify every function reachable from its entry.
pub fn decode(bytes: &[u8]) -> Result<Function, ImageError> {
    let image: Image = postcard::from_bytes(bytes)?;

    if image.magic != MAGIC {
        return Err(ImageError::InvalidMagic(image.magic));
    }
    if image.version != VERSION {
        return Err(ImageError::UnsupportedVersion(image.version));
    }

    let module = Module::from_definitions(image.functions);
    check_reachable(&module, image.entry)?;
    module
        .into_function(image.entry)
        .ok_or(ImageError::Verify(VerifyError::UnknownFunction(image.entry)))
}
