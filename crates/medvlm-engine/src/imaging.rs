use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;
use medvlm_contracts::analysis::{GeneratedImage, UploadedImage};
use sha2::{Digest, Sha256};

pub const DEFAULT_DOWNLOAD_NAME: &str = "synthetic_xray.png";

/// Reads an image file, sniffing the media type from its content and falling
/// back to the extension only when the bytes are not recognised.
pub fn load_image(path: &Path) -> Result<UploadedImage> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let media_type = image::guess_format(&bytes)
        .ok()
        .map(|format| format.to_mime_type())
        .or_else(|| media_type_from_extension(path))
        .ok_or_else(|| anyhow!("{} is not a recognised image", path.display()))?;
    let image = UploadedImage::new(bytes, media_type)
        .map_err(|err| anyhow!("{}: {err}", path.display()))?;
    Ok(match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => image.with_name(name),
        None => image,
    })
}

// The image crate has no HEIF support, so those extensions are mapped here.
fn media_type_from_extension(path: &Path) -> Option<&'static str> {
    if let Ok(format) = ImageFormat::from_path(path) {
        return Some(format.to_mime_type());
    }
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

/// Pixel dimensions, when the payload decodes.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::load_from_memory(bytes)
        .ok()
        .map(|decoded| (decoded.width(), decoded.height()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Writes the generated bytes unchanged. A directory target receives
/// [`DEFAULT_DOWNLOAD_NAME`].
pub fn save_generated(image: &GeneratedImage, target: &Path) -> Result<PathBuf> {
    let path = if target.is_dir() {
        target.join(DEFAULT_DOWNLOAD_NAME)
    } else {
        target.to_path_buf()
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, image.bytes()).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, RgbImage};

    /// A 10x10 black square encoded as PNG.
    pub(crate) fn black_square_png() -> anyhow::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(10, 10))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use medvlm_contracts::analysis::GeneratedImage;

    use super::fixtures::black_square_png;
    use super::{image_dimensions, load_image, save_generated, sha256_hex, DEFAULT_DOWNLOAD_NAME};

    #[test]
    fn load_image_sniffs_png_regardless_of_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("scan.bin");
        fs::write(&path, black_square_png()?)?;

        let image = load_image(&path)?;
        assert_eq!(image.media_type(), "image/png");
        assert_eq!(image.name(), Some("scan.bin"));
        assert_eq!(image_dimensions(image.bytes()), Some((10, 10)));
        Ok(())
    }

    #[test]
    fn load_image_maps_heif_extensions() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let heic = temp.path().join("phone_capture.HEIC");
        fs::write(&heic, b"\0\0\0\x18ftypheic")?;
        assert_eq!(load_image(&heic)?.media_type(), "image/heic");

        let heif = temp.path().join("scan.heif");
        fs::write(&heif, b"\0\0\0\x18ftypmif1")?;
        let image = load_image(&heif)?;
        assert_eq!(image.media_type(), "image/heif");
        assert_eq!(image_dimensions(image.bytes()), None);
        Ok(())
    }

    #[test]
    fn load_image_rejects_non_images_and_missing_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let text = temp.path().join("notes.txt");
        fs::write(&text, b"not an image")?;
        assert!(load_image(&text).is_err());
        assert!(load_image(&temp.path().join("missing.png")).is_err());

        let empty = temp.path().join("empty.png");
        fs::write(&empty, b"")?;
        assert!(load_image(&empty).is_err());
        Ok(())
    }

    #[test]
    fn save_generated_writes_exact_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = GeneratedImage::new(b"generated".to_vec(), Some("image/png"), "prompt")
            .map_err(anyhow::Error::msg)?;

        let into_dir = save_generated(&image, temp.path())?;
        assert_eq!(into_dir, temp.path().join(DEFAULT_DOWNLOAD_NAME));
        assert_eq!(fs::read(&into_dir)?, image.bytes());

        let nested = save_generated(&image, &temp.path().join("out").join("xray.png"))?;
        assert_eq!(fs::read(nested)?, b"generated".to_vec());
        Ok(())
    }

    #[test]
    fn sha256_is_lowercase_hex() {
        let digest = sha256_hex(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
