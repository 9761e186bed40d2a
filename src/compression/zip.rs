use super::optimize_bytes::*;
use super::{ByteVec, Bytes};
use crate::error::{Error, Result};


pub fn decompress_bytes(data: Bytes<'_>, expected_byte_size: usize) -> Result<ByteVec> {
    let options = zune_inflate::DeflateOptions::default()
        .set_limit(expected_byte_size)
        .set_size_hint(expected_byte_size);

    let mut decoder = zune_inflate::DeflateDecoder::new_with_options(data, options);

    let mut decompressed = decoder.decode_zlib()
        .map_err(|_| Error::invalid("zlib-compressed data malformed"))?;

    differences_to_samples(&mut decompressed);
    interleave_byte_blocks(&mut decompressed);

    Ok(decompressed)
}

pub fn compress_bytes(uncompressed: Bytes<'_>) -> Result<ByteVec> {
    let mut packed = Vec::from(uncompressed);

    separate_bytes_fragments(&mut packed);
    samples_to_differences(&mut packed);

    Ok(miniz_oxide::deflate::compress_to_vec_zlib(packed.as_slice(), 4))
}

#[cfg(test)]
mod test {
    use rand::Rng;

    #[test]
    fn roundtrip(){
        let data: Vec<u8> = (0 .. 2048).map(|index| (index % 100) as u8).collect();

        let compressed = super::compress_bytes(&data).unwrap();
        assert!(compressed.len() < data.len());

        let decompressed = super::decompress_bytes(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn roundtrip_random(){
        let mut random = rand::rng();

        for _ in 0 .. 16 {
            let length = random.random_range(0 .. 2048);
            let data: Vec<u8> = (0 .. length).map(|_| random.random()).collect();

            let compressed = super::compress_bytes(&data).unwrap();
            let decompressed = super::decompress_bytes(&compressed, data.len()).unwrap();
            assert_eq!(decompressed, data);
        }
    }

    #[test]
    fn malformed_stream_is_rejected(){
        assert!(super::decompress_bytes(&[1, 2, 3, 4], 100).is_err());
    }
}
