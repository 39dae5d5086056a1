//! cats-codec — payload codecs (bytes/scheme/files) and compressors
//! (dummy/gzip/zlib), identified by the 8-bit ids carried in a
//! `RequestHead`/`StreamHead`/`InputHead`.

pub mod codec;
pub mod compressor;
pub mod files;

pub use codec::{Codec, CodecError, CodecRegistry, EncodeInput, Payload};
pub use compressor::{Compressor, CompressorError, CompressorRegistry};
pub use files::{FileEntry, FileSource, Files};
