use crate::CodecError;
use model::Compression;
use std::io::Write;

/// Compress `data` with the configured codec. `None` passes the input
/// through untouched.
pub fn compress(codec: Compression, data: Vec<u8>) -> Result<Vec<u8>, CodecError> {
    match codec {
        Compression::None => Ok(data),
        Compression::Gzip => {
            let mut writer =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            writer.write_all(&data).map_err(CodecError::Compress)?;
            writer.finish().map_err(CodecError::Compress)
        }
        Compression::Snappy => snap::raw::Encoder::new()
            .compress_vec(&data)
            .map_err(|err| CodecError::Compress(std::io::Error::other(err))),
        Compression::Lz4 => {
            let mut writer = lz4_flex::frame::FrameEncoder::new(Vec::new());
            writer.write_all(&data).map_err(CodecError::Compress)?;
            writer
                .finish()
                .map_err(|err| CodecError::Compress(std::io::Error::other(err)))
        }
        Compression::Zstd => zstd::bulk::compress(&data, 0).map_err(CodecError::Compress),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    const SAMPLE: &[u8] = b"the quick brown fox jumps over the lazy dog, repeatedly, \
        the quick brown fox jumps over the lazy dog";

    #[test]
    fn none_is_identity() {
        assert_eq!(compress(Compression::None, SAMPLE.to_vec()).unwrap(), SAMPLE);
    }

    #[test]
    fn gzip_round_trips() {
        let compressed = compress(Compression::Gzip, SAMPLE.to_vec()).unwrap();
        let mut reader = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, SAMPLE);
    }

    #[test]
    fn snappy_round_trips() {
        let compressed = compress(Compression::Snappy, SAMPLE.to_vec()).unwrap();
        let out = snap::raw::Decoder::new()
            .decompress_vec(&compressed)
            .unwrap();
        assert_eq!(out, SAMPLE);
    }

    #[test]
    fn lz4_round_trips() {
        let compressed = compress(Compression::Lz4, SAMPLE.to_vec()).unwrap();
        let mut reader = lz4_flex::frame::FrameDecoder::new(compressed.as_slice());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, SAMPLE);
    }

    #[test]
    fn zstd_round_trips() {
        let compressed = compress(Compression::Zstd, SAMPLE.to_vec()).unwrap();
        let out = zstd::decode_all(compressed.as_slice()).unwrap();
        assert_eq!(out, SAMPLE);
    }
}
