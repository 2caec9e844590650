use crate::events::Polygon;
use image::GrayImage;
use tracing::trace;

/// A symbol found in a frame. The payload is None when the outline was
/// located but the content could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSymbol {
    pub payload: Option<String>,
    pub polygon: Polygon,
}

pub trait SymbolDecoder: Send {
    fn decode(&self, image: &GrayImage) -> Vec<DecodedSymbol>;
}

/// QR code detection and decoding via rqrr
#[derive(Debug, Clone, Copy, Default)]
pub struct QrDecoder;

impl SymbolDecoder for QrDecoder {
    fn decode(&self, image: &GrayImage) -> Vec<DecodedSymbol> {
        let (width, height) = image.dimensions();
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                image.get_pixel(x as u32, y as u32).0[0]
            });

        prepared
            .detect_grids()
            .into_iter()
            .map(|grid| {
                let polygon = grid.bounds.iter().map(|p| (p.x, p.y)).collect();
                let payload = match grid.decode() {
                    Ok((_, content)) => Some(content),
                    Err(e) => {
                        trace!("QR grid found but not decodable: {:?}", e);
                        None
                    }
                };
                DecodedSymbol { payload, polygon }
            })
            .collect()
    }
}

/// Render `payload` as a QR code, `scale` pixels per module, with a
/// four-module quiet zone
#[cfg(test)]
pub(crate) fn render_qr(payload: &str, scale: u32) -> GrayImage {
    use image::Luma;
    use qrcode::{Color, QrCode};

    const QUIET_MODULES: u32 = 4;

    let code = QrCode::new(payload.as_bytes()).unwrap();
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let side = (modules + 2 * QUIET_MODULES) * scale;

    GrayImage::from_fn(side, side, |x, y| {
        let mx = (x / scale) as i64 - QUIET_MODULES as i64;
        let my = (y / scale) as i64 - QUIET_MODULES as i64;
        let inside = (0..modules as i64).contains(&mx) && (0..modules as i64).contains(&my);
        if inside && colors[(my as u32 * modules + mx as u32) as usize] == Color::Dark {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}
