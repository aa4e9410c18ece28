//! Page images of scanned PDFs.
//!
//! A scanner writes each page as an image XObject: a JPEG stream, a
//! self-describing encoded image, or raw 8-bit pixels. OCR gets the largest
//! one re-encoded as PNG; provenance verification reads all of them.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use lopdf::{Document, Object, ObjectId};

use super::types::PdfPageRenderer;
use super::ExtractionError;

pub struct LopdfImageExtractor;

impl PdfPageRenderer for LopdfImageExtractor {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        Ok(load_document(pdf_bytes)?.get_pages().len())
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
    ) -> Result<Vec<u8>, ExtractionError> {
        let doc = load_document(pdf_bytes)?;
        let page_id = page_id_at(&doc, page_number)?;

        let largest = page_image_streams(&doc, page_id)?
            .into_iter()
            .max_by_key(|bytes| bytes.len())
            .ok_or_else(|| {
                ExtractionError::PdfParsing("No image XObjects found on this page".into())
            })?;

        let img = image::load_from_memory(&largest).map_err(|e| {
            ExtractionError::ImageProcessing(format!("Failed to decode extracted image: {e}"))
        })?;
        let png = encode_png(&img)?;

        tracing::debug!(
            page = page_number,
            raw_size = largest.len(),
            png_size = png.len(),
            "Extracted image from PDF page"
        );

        Ok(png)
    }
}

/// Every decodable image on one zero-based page.
///
/// Images that fail to decode are skipped.
pub fn page_images(
    pdf_bytes: &[u8],
    page_number: usize,
) -> Result<Vec<DynamicImage>, ExtractionError> {
    let doc = load_document(pdf_bytes)?;
    let page_id = page_id_at(&doc, page_number)?;
    Ok(page_image_streams(&doc, page_id)?
        .iter()
        .filter_map(|bytes| image::load_from_memory(bytes).ok())
        .collect())
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ExtractionError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encode failed: {e}")))?;
    Ok(buf.into_inner())
}

fn load_document(pdf_bytes: &[u8]) -> Result<Document, ExtractionError> {
    Document::load_mem(pdf_bytes)
        .map_err(|e| ExtractionError::PdfParsing(format!("Failed to parse PDF: {e}")))
}

/// Page tree levels walked when resolving inherited attributes.
const MAX_PAGE_TREE_DEPTH: usize = 32;

/// `key` from the page dictionary, or from the nearest `/Parent` that sets
/// it. Page attributes such as /Resources and /MediaBox are inheritable.
pub(crate) fn inherited_attribute<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        if let Ok(entry) = node.get(key) {
            return Some(follow(doc, entry));
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// The resources in effect for a page, own or inherited.
pub(crate) fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&lopdf::Dictionary> {
    inherited_attribute(doc, page_id, b"Resources").and_then(|obj| obj.as_dict().ok())
}

fn page_id_at(doc: &Document, page_number: usize) -> Result<ObjectId, ExtractionError> {
    let total = doc.get_pages().len();
    doc.page_iter()
        .nth(page_number)
        .ok_or_else(|| parse_error(format!("Page {page_number} not found (PDF has {total} pages)")))
}

fn parse_error(message: impl Into<String>) -> ExtractionError {
    ExtractionError::PdfParsing(message.into())
}

fn key_name(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

/// Encoded bytes of each image XObject in the page's resources.
fn page_image_streams(doc: &Document, page_id: ObjectId) -> Result<Vec<Vec<u8>>, ExtractionError> {
    doc.get_dictionary(page_id)
        .map_err(|e| parse_error(format!("Page {page_id:?} unreadable: {e}")))?;
    let resources =
        page_resources(doc, page_id).ok_or_else(|| parse_error("/Resources missing"))?;
    let xobjects = sub_dictionary(doc, resources, b"XObject")?;

    let streams = xobjects
        .iter()
        .filter_map(|(_, entry)| match follow(doc, entry) {
            Object::Stream(stream) if has_name(&stream.dict, b"Subtype", b"Image") => Some(stream),
            _ => None,
        });

    let mut images = Vec::new();
    for stream in streams {
        match stream_image_bytes(doc, stream) {
            Ok(bytes) => images.push(bytes),
            Err(e) => tracing::debug!(error = %e, "Skipping undecodable image XObject"),
        }
    }
    Ok(images)
}

/// True when `key` is the name `expected`, or an array containing it.
fn has_name(dict: &lopdf::Dictionary, key: &[u8], expected: &[u8]) -> bool {
    match dict.get(key) {
        Ok(Object::Name(name)) => name == expected,
        Ok(Object::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Object::Name(name) if name == expected)),
        _ => false,
    }
}

fn stream_image_bytes(doc: &Document, stream: &lopdf::Stream) -> Result<Vec<u8>, ExtractionError> {
    // Unfiltered streams fail decompression; their raw content is the data
    let content = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());

    // DCTDecode content is already a complete JPEG file
    if has_name(&stream.dict, b"Filter", b"DCTDecode") || image::load_from_memory(&content).is_ok() {
        return Ok(content);
    }
    reconstruct_raw_image(doc, &stream.dict, &content)
}

/// PNG rebuilt from an 8-bit raw pixel buffer described by the stream dictionary.
fn reconstruct_raw_image(
    doc: &Document,
    dict: &lopdf::Dictionary,
    raw_pixels: &[u8],
) -> Result<Vec<u8>, ExtractionError> {
    let width = integer(dict, b"Width")? as u32;
    let height = integer(dict, b"Height")? as u32;
    let depth = integer(dict, b"BitsPerComponent").unwrap_or(8);
    if depth != 8 {
        return Err(ExtractionError::ImageProcessing(format!(
            "{depth}-bit components are not supported"
        )));
    }

    let channels = color_components(doc, dict);
    let needed = width as usize * height as usize * channels as usize;
    let Some(pixels) = raw_pixels.get(..needed).map(<[u8]>::to_vec) else {
        return Err(ExtractionError::ImageProcessing(format!(
            "{width}x{height}x{channels} image needs {needed} bytes, stream has {}",
            raw_pixels.len()
        )));
    };

    let img = match channels {
        1 => image::GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        3 => image::RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
        4 => image::RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8),
        n => {
            return Err(ExtractionError::ImageProcessing(format!(
                "{n} color components are not supported"
            )))
        }
    }
    .ok_or_else(|| ExtractionError::ImageProcessing("Pixel buffer does not fit image".into()))?;

    encode_png(&img)
}

/// Components per pixel implied by /ColorSpace; RGB when absent or unknown.
fn color_components(doc: &Document, dict: &lopdf::Dictionary) -> u32 {
    let Ok(space) = dict.get(b"ColorSpace").map(|obj| follow(doc, obj)) else {
        return 3;
    };
    match space {
        Object::Name(name) if name == b"DeviceGray" => 1,
        Object::Name(name) if name == b"DeviceCMYK" => 4,
        Object::Array(parts) => match parts.first() {
            Some(Object::Name(family)) if family == b"Indexed" => 1,
            Some(Object::Name(family)) if family == b"ICCBased" => parts
                .get(1)
                .and_then(|profile| match follow(doc, profile) {
                    Object::Stream(s) => integer(&s.dict, b"N").ok(),
                    _ => None,
                })
                .map_or(3, |n| n as u32),
            _ => 3,
        },
        _ => 3,
    }
}

fn follow<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn sub_dictionary<'a>(
    doc: &'a Document,
    dict: &'a lopdf::Dictionary,
    key: &[u8],
) -> Result<&'a lopdf::Dictionary, ExtractionError> {
    let entry = dict
        .get(key)
        .map_err(|_| parse_error(format!("/{} missing", key_name(key))))?;
    follow(doc, entry)
        .as_dict()
        .map_err(|_| parse_error(format!("/{} is not a dictionary", key_name(key))))
}

fn integer(dict: &lopdf::Dictionary, key: &[u8]) -> Result<i64, ExtractionError> {
    let entry = dict
        .get(key)
        .map_err(|_| parse_error(format!("/{} missing from image", key_name(key))))?;
    entry
        .as_i64()
        .map_err(|_| parse_error(format!("/{} is not an integer", key_name(key))))
}

// ── Test fixtures ────────────────────────────────────────────────────────


// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use image::GenericImageView;
    use lopdf::dictionary;

    #[test]
    fn extractor_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LopdfImageExtractor>();
    }

    #[test]
    fn extract_image_from_scanned_pdf() {
        let pdf_bytes = single_page_pdf(200, 300);

        let png = LopdfImageExtractor.render_page(&pdf_bytes, 0).unwrap();
        assert_eq!(&png[0..4], b"\x89PNG");

        let img = image::load_from_memory(&png).unwrap();
        assert_eq!(img.dimensions(), (200, 300));
    }

    #[test]
    fn page_count_matches_pages() {
        let pdf_bytes = make_scanned_pdf(&[
            ("A", make_test_jpeg(20, 20), 20, 20),
            ("B", make_test_jpeg(30, 30), 30, 30),
        ]);
        assert_eq!(LopdfImageExtractor.page_count(&pdf_bytes).unwrap(), 2);
        let second = LopdfImageExtractor.render_page(&pdf_bytes, 1).unwrap();
        let img = image::load_from_memory(&second).unwrap();
        assert_eq!(img.width(), 30);
    }

    #[test]
    fn invalid_page_number_returns_error() {
        let pdf_bytes = single_page_pdf(100, 100);
        let err = LopdfImageExtractor
            .render_page(&pdf_bytes, 5)
            .unwrap_err()
            .to_string();
        assert!(err.contains("not found"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let result = LopdfImageExtractor.page_count(b"definitely not a pdf");
        assert!(matches!(result, Err(ExtractionError::PdfParsing(_))));
    }

    #[test]
    fn page_images_lists_every_image() {
        let pdf_bytes = single_page_pdf(50, 60);
        let images = page_images(&pdf_bytes, 0).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].dimensions(), (50, 60));
    }

    #[test]
    fn resources_inherited_from_page_tree_are_found() {
        let pdf_bytes = inherited_resources_pdf(80, 90);

        let png = LopdfImageExtractor.render_page(&pdf_bytes, 0).unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!(img.dimensions(), (80, 90));
        assert_eq!(page_images(&pdf_bytes, 0).unwrap().len(), 1);
    }

    #[test]
    fn page_without_any_resources_is_a_parse_error() {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => Object::Name(b"Page".to_vec()),
            "Parent" => Object::Reference(pages_id),
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => Object::Name(b"Pages".to_vec()),
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => Object::Integer(1),
            }),
        );
        let err = page_image_streams(&doc, page_id).unwrap_err().to_string();
        assert!(err.contains("/Resources missing"));
    }

    #[test]
    fn raw_gray_pixels_are_reconstructed() {
        let doc = Document::with_version("1.4");
        let dict = dictionary! {
            "Width" => Object::Integer(2),
            "Height" => Object::Integer(2),
            "BitsPerComponent" => Object::Integer(8),
            "ColorSpace" => Object::Name(b"DeviceGray".to_vec()),
        };
        let png = reconstruct_raw_image(&doc, &dict, &[0, 255, 255, 0]).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(img.get_pixel(1, 0).0, [255]);
        assert_eq!(img.get_pixel(1, 1).0, [0]);
    }

    #[test]
    fn short_pixel_buffer_rejected() {
        let doc = Document::with_version("1.4");
        let dict = dictionary! {
            "Width" => Object::Integer(10),
            "Height" => Object::Integer(10),
            "ColorSpace" => Object::Name(b"DeviceRGB".to_vec()),
        };
        assert!(reconstruct_raw_image(&doc, &dict, &[0; 10]).is_err());
    }
}
