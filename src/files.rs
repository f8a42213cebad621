//! Upload validation: size, then content sniffing, then image decode.

use std::io::Cursor;

use image::{ImageFormat, ImageReader};
use sha2::{Digest, Sha256};

use crate::config::UploadLimits;
use crate::errors::{AppError, AppResult};

const PDF: &str = "application/pdf";
const JPEG: &str = "image/jpeg";
const PNG: &str = "image/png";
const GIF: &str = "image/gif";
const WEBP: &str = "image/webp";
const DOC: &str = "application/msword";
const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const XLS: &str = "application/vnd.ms-excel";
const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const TEXT: &str = "text/plain";
const CSV: &str = "text/csv";

const BLUEPRINT_TYPES: &[&str] = &[PDF, JPEG, PNG];
const ATTACHMENT_TYPES: &[&str] = &[PDF, DOC, DOCX, XLS, XLSX, TEXT, CSV, JPEG, PNG, GIF, WEBP];

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Blueprint,
    Attachment,
}

impl UploadKind {
    fn allowed(self) -> &'static [&'static str] {
        match self {
            UploadKind::Blueprint => BLUEPRINT_TYPES,
            UploadKind::Attachment => ATTACHMENT_TYPES,
        }
    }

    fn max_bytes(self, limits: &UploadLimits) -> u64 {
        match self {
            UploadKind::Blueprint => limits.max_blueprint_bytes,
            UploadKind::Attachment => limits.max_attachment_bytes,
        }
    }
}

/// Raw multipart file field.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ValidatedFile {
    pub file_name: String,
    pub mime: &'static str,
    pub size: i64,
    pub checksum: String,
    pub dimensions: Option<(u32, u32)>,
    pub bytes: Vec<u8>,
}

impl ValidatedFile {
    /// Short type tag stored alongside the file, e.g. `pdf` or `png`.
    pub fn file_type(&self) -> &'static str {
        extension_for(self.mime)
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        PDF => "pdf",
        JPEG => "jpg",
        PNG => "png",
        GIF => "gif",
        WEBP => "webp",
        DOC => "doc",
        DOCX => "docx",
        XLS => "xls",
        XLSX => "xlsx",
        TEXT => "txt",
        CSV => "csv",
        _ => "bin",
    }
}

fn guessed_from_name(file_name: &str) -> Option<&'static str> {
    mime_guess::from_path(file_name).first_raw()
}

/// Detect the MIME type from content. Container formats (ZIP, OLE) and plain
/// text carry no distinguishing signature, so the file name decides between
/// their members.
pub fn sniff_mime(bytes: &[u8], file_name: &str) -> Option<&'static str> {
    if let Ok(format) = image::guess_format(bytes) {
        return match format {
            ImageFormat::Png => Some(PNG),
            ImageFormat::Jpeg => Some(JPEG),
            ImageFormat::Gif => Some(GIF),
            ImageFormat::WebP => Some(WEBP),
            _ => None,
        };
    }

    if bytes.starts_with(b"%PDF-") {
        return Some(PDF);
    }

    let by_name = guessed_from_name(file_name);
    if bytes.starts_with(ZIP_MAGIC) {
        return by_name.filter(|mime| [DOCX, XLSX].contains(mime));
    }
    if bytes.starts_with(OLE_MAGIC) {
        return by_name.filter(|mime| [DOC, XLS].contains(mime));
    }

    by_name.filter(|mime| [TEXT, CSV].contains(mime) && std::str::from_utf8(bytes).is_ok())
}

fn decode_dimensions(bytes: &[u8]) -> AppResult<(u32, u32)> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| AppError::corrupt_file(format!("unreadable image: {err}")))?;
    let image = reader
        .decode()
        .map_err(|err| AppError::corrupt_file(format!("image failed to decode: {err}")))?;
    Ok((image.width(), image.height()))
}

/// Runs the checks in order and stops at the first failure.
pub fn validate(upload: UploadedFile, kind: UploadKind, limits: &UploadLimits) -> AppResult<ValidatedFile> {
    let UploadedFile { file_name, bytes } = upload;

    if bytes.is_empty() {
        return Err(AppError::validation("file must not be empty"));
    }

    let max = kind.max_bytes(limits);
    if bytes.len() as u64 > max {
        return Err(AppError::file_too_large(format!(
            "{} bytes exceeds the {} MB limit",
            bytes.len(),
            max / (1024 * 1024)
        )));
    }

    let mime = sniff_mime(&bytes, &file_name)
        .ok_or_else(|| AppError::unsupported_file_type("unable to detect file type"))?;
    if !kind.allowed().contains(&mime) {
        return Err(AppError::unsupported_file_type(format!("{mime} is not allowed here")));
    }

    let dimensions = if mime.starts_with("image/") {
        Some(decode_dimensions(&bytes)?)
    } else {
        None
    };

    let checksum = hex::encode(Sha256::digest(&bytes));

    Ok(ValidatedFile {
        file_name,
        mime,
        size: bytes.len() as i64,
        checksum,
        dimensions,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn upload(name: &str, bytes: Vec<u8>) -> UploadedFile {
        UploadedFile {
            file_name: name.into(),
            bytes,
        }
    }

    #[test]
    fn accepts_real_png_and_reads_dimensions() {
        let file = validate(upload("plan.png", png_bytes(4, 3)), UploadKind::Blueprint, &UploadLimits::default()).unwrap();
        assert_eq!(file.mime, PNG);
        assert_eq!(file.file_type(), "png");
        assert_eq!(file.dimensions, Some((4, 3)));
        assert_eq!(file.checksum.len(), 64);
    }

    #[test]
    fn size_is_checked_before_type() {
        let limits = UploadLimits {
            max_blueprint_bytes: 4,
            max_attachment_bytes: 4,
        };
        let err = validate(upload("x.exe", b"MZ\x90\x00\x03".to_vec()), UploadKind::Blueprint, &limits).unwrap_err();
        assert!(matches!(err, AppError::FileTooLarge(_)));
    }

    #[test]
    fn extension_does_not_override_content() {
        let err = validate(upload("fake.pdf", b"not a pdf".to_vec()), UploadKind::Blueprint, &UploadLimits::default())
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFileType(_)));
    }

    #[test]
    fn blueprint_rejects_office_documents() {
        let mut docx = ZIP_MAGIC.to_vec();
        docx.extend_from_slice(&[0; 32]);
        let err = validate(upload("schedule.docx", docx.clone()), UploadKind::Blueprint, &UploadLimits::default()).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFileType(_)));

        let file = validate(upload("schedule.docx", docx), UploadKind::Attachment, &UploadLimits::default()).unwrap();
        assert_eq!(file.mime, DOCX);
    }

    #[test]
    fn truncated_image_is_corrupt() {
        let mut bytes = png_bytes(8, 8);
        bytes.truncate(40);
        let err = validate(upload("plan.png", bytes), UploadKind::Blueprint, &UploadLimits::default()).unwrap_err();
        assert!(matches!(err, AppError::CorruptFile(_)));
    }

    #[test]
    fn plain_text_needs_text_content() {
        let ok = validate(upload("notes.csv", b"a,b\n1,2\n".to_vec()), UploadKind::Attachment, &UploadLimits::default());
        assert_eq!(ok.unwrap().mime, CSV);

        let err = validate(upload("notes.txt", vec![0xff, 0xfe, 0x00]), UploadKind::Attachment, &UploadLimits::default())
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFileType(_)));
    }

    #[test]
    fn empty_upload_is_a_validation_error() {
        let err = validate(upload("plan.pdf", Vec::new()), UploadKind::Blueprint, &UploadLimits::default()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
