//! `multipart/form-data` framing for [`FormData`]

use super::{CodecError, FormData, FormValue};
use crate::value::{Blob, OCTET_STREAM};
use bytes::{BufMut, Bytes, BytesMut};
use std::convert::Infallible;
use tracing::trace;
use uuid::Uuid;

pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// File name given to binary parts that have none.
const DEFAULT_FILE_NAME: &str = "blob";

/// True if the content type announces a multipart form.
pub fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with(MULTIPART_FORM_DATA)
}

fn escape(name: &str) -> String {
    name.replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Serialize a form. Returns the content type (with boundary) and the body.
pub fn encode(form: &FormData) -> (String, Bytes) {
    let boundary = format!("nexus-rpc-{}", Uuid::now_v7().simple());
    let mut body = BytesMut::new();

    for (name, value) in form.iter() {
        body.put_slice(format!("--{}\r\n", boundary).as_bytes());
        match value {
            FormValue::Text(text) => {
                body.put_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                        escape(name)
                    )
                    .as_bytes(),
                );
                body.put_slice(text.as_bytes());
            }
            FormValue::Blob(blob) => {
                let file_name = blob.name.as_deref().unwrap_or(DEFAULT_FILE_NAME);
                body.put_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        escape(name),
                        escape(file_name),
                        blob.media_type
                    )
                    .as_bytes(),
                );
                body.put_slice(&blob.data);
            }
        }
        body.put_slice(b"\r\n");
    }
    body.put_slice(format!("--{}--\r\n", boundary).as_bytes());

    trace!(parts = form.len(), bytes = body.len(), "Encoded multipart body");
    (
        format!("{}; boundary={}", MULTIPART_FORM_DATA, boundary),
        body.freeze(),
    )
}

/// Parse a multipart body. Parts with a file name become blobs, the rest text.
pub async fn decode(content_type: &str, body: Bytes) -> Result<FormData, CodecError> {
    let boundary = multer::parse_boundary(content_type)?;
    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut form = FormData::new();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let media_type = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await?;

        match file_name {
            Some(file_name) => form.append_blob(
                name,
                Blob::file(
                    file_name,
                    data,
                    media_type.unwrap_or_else(|| OCTET_STREAM.to_string()),
                ),
            ),
            None => form.append_text(name, String::from_utf8_lossy(&data).into_owned()),
        }
    }

    trace!(parts = form.len(), "Decoded multipart body");
    Ok(form)
}
