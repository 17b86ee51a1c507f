use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat};
use serde_json::json;
use stylefusion_contracts::data_url::encode_data_url;
use stylefusion_contracts::TryOnError;

use super::{map_object, InlineImage, ProviderOutput, TryOnProvider, TryOnRequest};

/// Offline provider that pastes a thumbnail of the garment onto the person
/// photo. Used for local runs and tests; never touches the network.
pub struct DryrunProvider;

impl DryrunProvider {
    fn decode(label: &str, image: &InlineImage) -> Result<DynamicImage, TryOnError> {
        let bytes = base64_bytes(image.payload())
            .map_err(|err| TryOnError::upstream(format!("dryrun: {label} image is not base64: {err}")))?;
        image::load_from_memory(&bytes)
            .map_err(|err| TryOnError::upstream(format!("dryrun: cannot decode {label} image: {err}")))
    }

    fn compose(person: &DynamicImage, clothing: &DynamicImage) -> DynamicImage {
        let mut canvas = person.to_rgba8();
        let (width, height) = canvas.dimensions();
        let thumb = clothing.resize(
            (width / 3).max(1),
            (height / 3).max(1),
            FilterType::Triangle,
        );
        let x = i64::from(width.saturating_sub(thumb.width()));
        let y = i64::from(height.saturating_sub(thumb.height()));
        imageops::overlay(&mut canvas, &thumb.to_rgba8(), x, y);
        DynamicImage::ImageRgba8(canvas)
    }
}

impl TryOnProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &TryOnRequest) -> Result<ProviderOutput, TryOnError> {
        let person = Self::decode("person", &request.person)?;
        let clothing = Self::decode("clothing", &request.clothing)?;
        let composed = Self::compose(&person, &clothing);

        let mut encoded = Cursor::new(Vec::new());
        composed
            .write_to(&mut encoded, ImageFormat::Png)
            .map_err(|err| TryOnError::upstream(format!("dryrun: cannot encode result: {err}")))?;
        let bytes = encoded.into_inner();

        Ok(ProviderOutput {
            image: encode_data_url("image/png", &bytes),
            provider_request: map_object(json!({
                "model": request.model,
                "person_mime_type": request.person.resolved_mime_type(),
                "clothing_mime_type": request.clothing.resolved_mime_type(),
            })),
            provider_response: map_object(json!({
                "width": composed.width(),
                "height": composed.height(),
                "bytes": bytes.len(),
            })),
        })
    }
}

fn base64_bytes(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(payload.as_bytes())
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};
    use stylefusion_contracts::data_url::decode_data_url;

    use super::*;

    fn png_data_url(width: u32, height: u32, pixel: [u8; 4]) -> anyhow::Result<String> {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(pixel)));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png)?;
        Ok(encode_data_url("image/png", &out.into_inner()))
    }

    #[test]
    fn composes_garment_thumbnail_onto_person() -> anyhow::Result<()> {
        let request = TryOnRequest::new(
            InlineImage::new("image/png", png_data_url(9, 9, [255, 0, 0, 255])?),
            InlineImage::new("image/png", png_data_url(3, 3, [0, 0, 255, 255])?),
        );
        let output = DryrunProvider.generate(&request)?;
        assert!(output.image.starts_with("data:image/png;base64,"));

        let decoded = decode_data_url(&output.image)?;
        let result = image::load_from_memory(&decoded.bytes)?.to_rgba8();
        assert_eq!(result.dimensions(), (9, 9));

        let corner = result.get_pixel(0, 0);
        assert!(corner[0] > 200 && corner[2] < 50);
        let patch = result.get_pixel(8, 8);
        assert!(patch[2] > 200 && patch[0] < 50);
        assert_eq!(output.provider_response["width"], json!(9));
        Ok(())
    }

    #[test]
    fn undecodable_input_is_upstream_failure() -> anyhow::Result<()> {
        let request = TryOnRequest::new(
            InlineImage::new("image/png", "data:image/png;base64,Zm9v"),
            InlineImage::new("image/png", png_data_url(3, 3, [0, 0, 255, 255])?),
        );
        let err = DryrunProvider.generate(&request).err();
        assert!(matches!(err, Some(TryOnError::Upstream(ref message)) if message.contains("person")));
        Ok(())
    }
}
