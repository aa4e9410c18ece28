use std::io::{Cursor, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, GrayImage, ImageFormat};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use super::{qr, ProvenanceError};
use crate::pipeline::extraction::pdf_renderer::{inherited_attribute, page_images, page_resources};
use crate::pipeline::intake::DocumentKind;

/// Share of the image width taken by the code on raster images.
const IMAGE_CODE_FRACTION: f32 = 0.2;
const IMAGE_MARGIN_PX: i64 = 10;
const JPEG_QUALITY: u8 = 95;

/// Offset from the bottom-right corner of the first PDF page, in points.
const PDF_MARGIN_PT: f32 = 36.0;
const DEFAULT_PAGE_WIDTH_PT: f32 = 612.0;
const PDF_XOBJECT_NAME: &str = "ScanRouteQr";

/// Stamp `payload` onto the file at `path`, replacing it atomically.
pub fn stamp_file(path: &Path, payload: &str) -> Result<(), ProvenanceError> {
    let bytes = std::fs::read(path)?;
    let stamped = match DocumentKind::from_path(path) {
        Some(DocumentKind::Paged) => stamp_pdf(&bytes, payload)?,
        Some(DocumentKind::Image) => stamp_image(&bytes, path, payload)?,
        None => return Err(ProvenanceError::UnsupportedFormat(path.to_path_buf())),
    };
    replace_contents(path, &stamped)
}

/// Decode every QR code on the artifact (first page only for PDFs).
pub fn read_codes(path: &Path) -> Result<Vec<String>, ProvenanceError> {
    let bytes = std::fs::read(path)?;
    match DocumentKind::from_path(path) {
        Some(DocumentKind::Paged) => {
            let images =
                page_images(&bytes, 0).map_err(|e| ProvenanceError::Pdf(e.to_string()))?;
            Ok(images
                .iter()
                .flat_map(|img| qr::decode(&img.to_luma8()))
                .collect())
        }
        Some(DocumentKind::Image) => {
            let img = image::load_from_memory(&bytes).map_err(image_err)?;
            Ok(qr::decode(&img.to_luma8()))
        }
        None => Err(ProvenanceError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn stamp_image(bytes: &[u8], path: &Path, payload: &str) -> Result<Vec<u8>, ProvenanceError> {
    let format = ImageFormat::from_path(path).map_err(image_err)?;
    let img = image::load_from_memory(bytes).map_err(image_err)?;

    // Whole pixels per module keep the modules crisp after scaling.
    let target = (img.width() as f32 * IMAGE_CODE_FRACTION) as u32;
    let module_px = (target / qr::side_in_modules(payload)?).max(1);
    let code = DynamicImage::ImageLuma8(qr::render(payload, module_px)?).to_rgba8();

    let mut canvas = img.to_rgba8();
    let x = i64::from(canvas.width()) - i64::from(code.width()) - IMAGE_MARGIN_PX;
    let y = i64::from(canvas.height()) - i64::from(code.height()) - IMAGE_MARGIN_PX;
    imageops::overlay(&mut canvas, &code, x.max(0), y.max(0));
    let stamped = DynamicImage::ImageRgba8(canvas);

    let mut out = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
            DynamicImage::ImageRgb8(stamped.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(image_err)?;
        }
        other => {
            stamped
                .write_to(&mut Cursor::new(&mut out), other)
                .map_err(image_err)?;
        }
    }
    Ok(out)
}

fn stamp_pdf(bytes: &[u8], payload: &str) -> Result<Vec<u8>, ProvenanceError> {
    let mut doc = Document::load_mem(bytes).map_err(pdf_err)?;
    let page_id = doc
        .page_iter()
        .next()
        .ok_or_else(|| ProvenanceError::Pdf("document has no pages".into()))?;

    let code = qr::render(payload, qr::MODULE_PX)?;
    let side = code.width();
    let xobject_id = doc.add_object(Object::Stream(gray_image_xobject(&code)));
    localize_resources(&mut doc, page_id)?;
    doc.add_xobject(page_id, PDF_XOBJECT_NAME.as_bytes().to_vec(), xobject_id)
        .map_err(pdf_err)?;

    // One image pixel per point.
    let size = side as f32;
    let x = (page_width(&doc, page_id) - size - PDF_MARGIN_PT).max(0.0);
    let draw = format!(
        "q {size} 0 0 {size} {x} {PDF_MARGIN_PT} cm /{PDF_XOBJECT_NAME} Do Q\n"
    );

    let existing = doc.get_page_content(page_id).map_err(pdf_err)?;
    let mut content = Vec::with_capacity(existing.len() + draw.len() + 8);
    content.extend_from_slice(b"q\n");
    content.extend_from_slice(&existing);
    content.extend_from_slice(b"\nQ\n");
    content.extend_from_slice(draw.as_bytes());
    doc.change_page_content(page_id, content).map_err(pdf_err)?;

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

fn gray_image_xobject(img: &GrayImage) -> Stream {
    let mut stream = Stream::new(
        dictionary! {
            "Type" => Object::Name(b"XObject".to_vec()),
            "Subtype" => Object::Name(b"Image".to_vec()),
            "Width" => Object::Integer(i64::from(img.width())),
            "Height" => Object::Integer(i64::from(img.height())),
            "ColorSpace" => Object::Name(b"DeviceGray".to_vec()),
            "BitsPerComponent" => Object::Integer(8),
        },
        img.as_raw().clone(),
    );
    stream.allows_compression = false;
    stream
}

/// Copy the page's effective resources onto the page itself, with a direct
/// /XObject dictionary, so a new entry extends them instead of shadowing them.
fn localize_resources(doc: &mut Document, page_id: ObjectId) -> Result<(), ProvenanceError> {
    let mut resources = page_resources(doc, page_id).cloned().unwrap_or_default();
    if let Ok(id) = resources.get(b"XObject").and_then(Object::as_reference) {
        let xobjects = doc.get_dictionary(id).map_err(pdf_err)?.clone();
        resources.set("XObject", Object::Dictionary(xobjects));
    }
    doc.get_dictionary_mut(page_id)
        .map_err(pdf_err)?
        .set("Resources", Object::Dictionary(resources));
    Ok(())
}

fn page_width(doc: &Document, page_id: ObjectId) -> f32 {
    inherited_attribute(doc, page_id, b"MediaBox")
        .and_then(|obj| obj.as_array().ok())
        .and_then(|bbox| bbox.get(2))
        .and_then(|w| w.as_float().ok())
        .unwrap_or(DEFAULT_PAGE_WIDTH_PT)
}

fn replace_contents(path: &Path, bytes: &[u8]) -> Result<(), ProvenanceError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| ProvenanceError::Io(e.error))?;
    Ok(())
}

fn image_err(e: image::ImageError) -> ProvenanceError {
    ProvenanceError::Image(e.to_string())
}

fn pdf_err(e: lopdf::Error) -> ProvenanceError {
    ProvenanceError::Pdf(e.to_string())
}

// ── Tests ────────────────────────────────────────────────────────────────
