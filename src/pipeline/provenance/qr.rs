use image::{GrayImage, Luma};
use qrcode::{Color, QrCode};

use super::ProvenanceError;

/// Pixels per module at native resolution.
pub const MODULE_PX: u32 = 6;

/// Light modules around the symbol.
pub const QUIET_ZONE_MODULES: u32 = 4;

/// Render `data` as a black-on-white QR code, `module_px` pixels per module.
pub fn render(data: &str, module_px: u32) -> Result<GrayImage, ProvenanceError> {
    let code = QrCode::new(data.as_bytes()).map_err(|e| ProvenanceError::QrEncode(e.to_string()))?;
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let module_px = module_px.max(1);
    let side = (modules + 2 * QUIET_ZONE_MODULES) * module_px;

    Ok(GrayImage::from_fn(side, side, |x, y| {
        let mx = (x / module_px).checked_sub(QUIET_ZONE_MODULES);
        let my = (y / module_px).checked_sub(QUIET_ZONE_MODULES);
        match (mx, my) {
            (Some(mx), Some(my)) if mx < modules && my < modules => {
                match colors[(my * modules + mx) as usize] {
                    Color::Dark => Luma([0]),
                    Color::Light => Luma([255]),
                }
            }
            _ => Luma([255]),
        }
    }))
}

/// Total modules across, quiet zone included, for `data`.
pub fn side_in_modules(data: &str) -> Result<u32, ProvenanceError> {
    let code = QrCode::new(data.as_bytes()).map_err(|e| ProvenanceError::QrEncode(e.to_string()))?;
    Ok(code.width() as u32 + 2 * QUIET_ZONE_MODULES)
}

/// Contents of every QR code found in `img`.
pub fn decode(img: &GrayImage) -> Vec<String> {
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        img.width() as usize,
        img.height() as usize,
        |x, y| img.get_pixel(x as u32, y as u32).0[0],
    );
    prepared
        .detect_grids()
        .into_iter()
        .filter_map(|grid| match grid.decode() {
            Ok((_meta, content)) => Some(content),
            Err(e) => {
                tracing::debug!(error = ?e, "QR grid found but not decodable");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_has_quiet_zone_and_square_shape() {
        let img = render("hello", MODULE_PX).unwrap();
        assert_eq!(img.width(), img.height());
        assert_eq!(img.width() % MODULE_PX, 0);
        assert_eq!(img.get_pixel(0, 0).0, [255]);
        // top-left finder pattern starts right after the quiet zone
        let edge = QUIET_ZONE_MODULES * MODULE_PX;
        assert_eq!(img.get_pixel(edge, edge).0, [0]);
    }

    #[test]
    fn side_in_modules_matches_render() {
        let data = r#"{"document_type":"invoice"}"#;
        let img = render(data, 3).unwrap();
        assert_eq!(img.width(), side_in_modules(data).unwrap() * 3);
    }

    #[test]
    fn render_then_decode() {
        let img = render("scanroute provenance", MODULE_PX).unwrap();
        assert_eq!(decode(&img), vec!["scanroute provenance".to_string()]);
    }

    #[test]
    fn blank_image_has_no_codes() {
        let img = GrayImage::from_pixel(100, 100, Luma([255]));
        assert!(decode(&img).is_empty());
    }
}
