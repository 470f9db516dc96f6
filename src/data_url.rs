use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbImage;
use thiserror::Error;

const BASE64_MARKER: &str = "base64,";

#[derive(Error, Debug)]
pub enum DataUrlError {
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("Failed to decode image: {0}")]
    DecodeFailed(#[from] image::ImageError),
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),
}

pub fn base64_payload(data_url: &str) -> Option<&str> {
    data_url
        .split_once(BASE64_MARKER)
        .map(|(_, payload)| payload)
}

/// Characters outside the base64 alphabet are discarded before decoding.
pub fn decode_image(payload: &str) -> Result<RgbImage, DataUrlError> {
    let compact: String = payload
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect();
    let bytes = STANDARD.decode(compact)?;

    let image = image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;

    Ok(image.to_rgb8())
}
