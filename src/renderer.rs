//! Challenge image rendering.
//!
//! Turns a challenge secret into a distorted PNG. Behind a trait so tests
//! can substitute a static renderer; the production implementation uses
//! the `captcha` crate. OCR-resistance is explicitly not a goal.

use captcha::filters::{Dots, Noise, Wave};
use captcha::Captcha;

/// Image dimensions for the rendered challenge.
const VIEW_WIDTH: u32 = 260;
const VIEW_HEIGHT: u32 = 116;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    #[error("failed to encode challenge image")]
    Encode,
}

/// Renders a challenge secret into image bytes.
pub trait ChallengeRenderer: Send + Sync {
    fn render(&self, secret: &str) -> Result<Vec<u8>, RenderError>;
}

/// Distorted-text PNG renderer.
#[derive(Default)]
pub struct CaptchaRenderer;

impl CaptchaRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ChallengeRenderer for CaptchaRenderer {
    fn render(&self, secret: &str) -> Result<Vec<u8>, RenderError> {
        let mut image = Captcha::new();
        for c in secret.chars() {
            image.set_chars(&[c]).add_char();
        }
        image
            .apply_filter(Noise::new(0.2))
            .apply_filter(Wave::new(2.0, 10.0).horizontal())
            .apply_filter(Dots::new(8))
            .view(VIEW_WIDTH, VIEW_HEIGHT);
        image.as_png().ok_or(RenderError::Encode)
    }
}
