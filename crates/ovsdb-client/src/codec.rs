use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

/// `JsonCodec` frames the OVSDB wire: JSON documents written back-to-back
/// with no delimiter. Decoding splits the next complete document off the
/// buffer; an incomplete tail waits for more bytes.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl Decoder for JsonCodec {
    type Item = Value;
    type Error = crate::Error;

    fn decode(&mut self, src: &mut BytesMut) -> crate::Result<Option<Value>> {
        let mut stream = serde_json::Deserializer::from_slice(src).into_iter::<Value>();
        match stream.next() {
            None => Ok(None),
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                src.advance(consumed);
                Ok(Some(value))
            }
            Some(Err(err)) if err.is_eof() => Ok(None),
            Some(Err(err)) => Err(err.into()),
        }
    }
}

impl Encoder<Value> for JsonCodec {
    type Error = crate::Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> crate::Result<()> {
        serde_json::to_writer(dst.writer(), &item)?;
        Ok(())
    }
}
