use brotli::enc::backward_references::BrotliEncoderParams;
use std::io::Write;

use crate::Error;

#[derive(Debug)]
pub enum CompressionError {
    Io(std::io::Error),
    DecodedSizeMismatch { expected: usize, actual: usize },
}

impl std::error::Error for CompressionError {}

impl std::fmt::Display for CompressionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "i/o error: {}", err),
            Self::DecodedSizeMismatch { expected, actual } => write!(
                f,
                "decoded {} bytes where {} were expected",
                actual, expected
            ),
        }
    }
}

impl From<std::io::Error> for CompressionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CompressionError> for Error {
    fn from(e: CompressionError) -> Self {
        Self::StorageCorrupted(e.to_string())
    }
}

/// Block compression helper type.
///
/// Levels only matter when compressing; the level carried by a value obtained
/// through [`Compression::from_id`] is the default for that algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zip(u32),
    Brotli(u32),
}

/// Brotli quality used for packages.
pub const DEFAULT_BROTLI_QUALITY: u32 = 5;

/// Deflate level used when building packages.
pub const BUILD_ZIP_LEVEL: u32 = 9;

const BROTLI_BUFFER_SIZE: usize = 1 << 20;

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::Zip(ref level) => write!(f, "ZIP({})", level),
            Compression::Brotli(ref level) => write!(f, "Brotli({})", level),
            Compression::None => write!(f, "None"),
        }
    }
}

impl Compression {
    /// Map a stored algorithm id to a compression value. A missing id means
    /// the data was stored verbatim.
    pub fn from_id(id: Option<&str>) -> Result<Self, Error> {
        match id {
            None => Ok(Compression::None),
            Some("ZIP") => Ok(Compression::Zip(6)),
            Some("Brotli") => Ok(Compression::Brotli(DEFAULT_BROTLI_QUALITY)),
            Some(other) => Err(Error::StorageCorrupted(format!(
                "unknown compression algorithm '{}'",
                other
            ))),
        }
    }
    /// The algorithm id as stored in the index, `None` for uncompressed.
    pub fn id(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Zip(_) => Some("ZIP"),
            Compression::Brotli(_) => Some("Brotli"),
        }
    }
    /// Upper bound on the compressed size of `input_size` bytes.
    pub fn compression_bound(self, input_size: usize) -> usize {
        match self {
            Compression::None => input_size,
            // zlib bound: data + 0.1% + wrapper
            Compression::Zip(_) => input_size + input_size / 1000 + 64,
            // Brotli worst case: raw blocks plus per-block overhead
            Compression::Brotli(_) => {
                if input_size == 0 {
                    return 2;
                }
                let large_blocks = input_size >> 24;
                let tail = input_size - (large_blocks << 24);
                let tail_overhead = if tail > (1 << 20) { 4 } else { 3 };
                input_size + 2 + 4 * large_blocks + tail_overhead + 1
            }
        }
    }
    /// Compress a block of data with the set compression.
    pub fn compress(self, input: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self {
            Compression::None => Ok(input.to_vec()),
            Compression::Zip(level) => {
                let mut encoder = flate2::write::ZlibEncoder::new(
                    Vec::with_capacity(self.compression_bound(input.len())),
                    flate2::Compression::new(level),
                );
                encoder.write_all(input)?;
                Ok(encoder.finish()?)
            }
            Compression::Brotli(level) => {
                let mut result = Vec::with_capacity(input.len());
                let params = BrotliEncoderParams {
                    quality: level as i32,
                    magic_number: false,
                    ..Default::default()
                };
                {
                    let mut writer = brotli::CompressorWriter::with_params(
                        &mut result,
                        BROTLI_BUFFER_SIZE,
                        &params,
                    );
                    writer.write_all(input)?;
                }
                Ok(result)
            }
        }
    }
    /// Decompress a block of data into exactly `output_size` bytes.
    ///
    /// Decompressing with the wrong algorithm, or getting back a different
    /// byte count than recorded at build time, is a corruption error.
    pub fn decompress(self, input: &[u8], output_size: usize) -> Result<Vec<u8>, CompressionError> {
        let output = match self {
            Compression::None => input.to_vec(),
            Compression::Zip(_) => {
                let mut decoder =
                    flate2::write::ZlibDecoder::new(Vec::with_capacity(output_size));
                decoder.write_all(input)?;
                decoder.finish()?
            }
            Compression::Brotli(_) => {
                let mut output = Vec::with_capacity(output_size);
                {
                    let mut decompressor =
                        brotli::DecompressorWriter::new(&mut output, BROTLI_BUFFER_SIZE);
                    decompressor.write_all(input)?;
                    decompressor.flush()?;
                }
                output
            }
        };
        if output.len() != output_size {
            return Err(CompressionError::DecodedSizeMismatch {
                expected: output_size,
                actual: output.len(),
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(compression: Compression, data: &[u8]) {
        let compressed = compression.compress(data).unwrap();
        let decompressed = compression.decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn zip_round_trip() {
        round_trip(Compression::Zip(6), b"some bytes worth compressing");
        round_trip(Compression::Zip(BUILD_ZIP_LEVEL), &vec![0u8; 256 * 1024]);
    }

    #[test]
    fn brotli_round_trip() {
        round_trip(
            Compression::Brotli(DEFAULT_BROTLI_QUALITY),
            b"some bytes worth compressing",
        );
        round_trip(Compression::Brotli(DEFAULT_BROTLI_QUALITY), &[]);
    }

    #[test]
    fn none_is_verbatim() {
        let data = b"verbatim";
        assert_eq!(Compression::None.compress(data).unwrap(), data);
    }

    #[test]
    fn zeros_compress_well() {
        let data = vec![0u8; 1 << 20];
        let compressed = Compression::Brotli(DEFAULT_BROTLI_QUALITY)
            .compress(&data)
            .unwrap();
        assert!(compressed.len() < data.len() / 100);
    }

    #[test]
    fn wrong_algorithm_fails() {
        let compressed = Compression::Brotli(DEFAULT_BROTLI_QUALITY)
            .compress(b"payload")
            .unwrap();
        assert!(Compression::Zip(6).decompress(&compressed, 7).is_err());
    }

    #[test]
    fn wrong_size_fails() {
        let compressed = Compression::Zip(6).compress(b"payload").unwrap();
        assert!(Compression::Zip(6).decompress(&compressed, 5).is_err());
    }

    #[test]
    fn unknown_id_is_rejected() {
        assert!(Compression::from_id(Some("LZMA")).is_err());
        assert_eq!(
            Compression::from_id(None).unwrap(),
            Compression::None
        );
    }
}
