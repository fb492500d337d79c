// SPDX-License-Identifier: MPL-2.0

//! Turning the offscreen target into a root window background.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::render::{NativeDisplay, OffscreenTarget, Renderer, SharedRenderer};

/// The X server side of the root window backend.
pub trait RootCanvas {
    /// Install a tightly packed BGRA image as the root background.
    fn install(&mut self, width: u32, height: u32, bgra: &[u8]) -> eyre::Result<()>;

    fn native_display(&self) -> NativeDisplay {
        NativeDisplay::Default
    }

    /// Drain pending events. Returns false once the connection is gone.
    fn pump_events(&mut self) -> bool {
        true
    }
}

/// Diagonal gradient shown when the GPU cannot be read back.
pub fn test_pattern(width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width.max(1), height.max(1));
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 255 / w) as u8, (y * 255 / h) as u8, 128, 255])
    })
    .into_raw()
}

/// Swap the red and blue channels of every pixel in place.
pub fn rgba_to_bgra(pixels: &mut [u8]) {
    pixels
        .par_chunks_exact_mut(4)
        .for_each(|pixel| pixel.swap(0, 2));
}

/// Read `target` back and install it on `canvas`.
///
/// A failed readback installs the test pattern instead and still counts as
/// success.
pub fn compose_frame(
    renderer: &mut Renderer,
    target: &OffscreenTarget,
    canvas: &mut dyn RootCanvas,
) -> bool {
    let (width, height) = (target.width, target.height);
    let expected = width as usize * height as usize * 4;

    if !renderer.make_current() {
        tracing::warn!("Reading back without a current context");
    }

    let mut pixels = match renderer.read_target(target) {
        Ok(pixels) if pixels.len() == expected => pixels,
        Ok(pixels) => {
            tracing::warn!(
                len = pixels.len(),
                expected,
                "Readback returned a short buffer, using test pattern"
            );
            test_pattern(width, height)
        }
        Err(why) => {
            tracing::warn!(%why, "Readback failed, using test pattern");
            test_pattern(width, height)
        }
    };

    rgba_to_bgra(&mut pixels);

    match canvas.install(width, height, &pixels) {
        Ok(()) => {
            tracing::trace!(width, height, "Root background installed");
            true
        }
        Err(why) => {
            tracing::warn!("Failed to install root background: {why:#}");
            false
        }
    }
}

/// Compose through the bound renderer, if there is one.
pub fn paint_root(
    renderer: Option<&SharedRenderer>,
    target: &OffscreenTarget,
    canvas: &mut dyn RootCanvas,
) -> bool {
    let Some(renderer) = renderer else {
        tracing::warn!("No renderer bound, cannot paint the root window");
        return false;
    };

    let Ok(mut renderer) = renderer.try_borrow_mut() else {
        tracing::warn!("Renderer busy, skipping root paint");
        return false;
    };

    compose_frame(&mut renderer, target, canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGpu, FakeRootCanvas};

    #[test]
    fn test_pattern_corners() {
        let pattern = test_pattern(4, 2);
        assert_eq!(pattern.len(), 4 * 2 * 4);
        assert_eq!(&pattern[..4], &[0, 0, 128, 255]);

        let last = &pattern[pattern.len() - 4..];
        assert_eq!(last, &[3 * 255 / 4, 255 / 2, 128, 255]);
    }

    #[test]
    fn test_channel_swap() {
        let mut pixels = vec![1, 2, 3, 4, 5, 6, 7, 8];
        rgba_to_bgra(&mut pixels);
        assert_eq!(pixels, vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn test_readback_failure_still_installs_full_size() {
        let gpu = FakeGpu::default();
        let log = gpu.log();
        log.borrow_mut().fail_readback = true;
        let mut renderer = Renderer::new(Box::new(gpu));
        let target = renderer.get_or_create_target(64, 32).unwrap();
        let mut canvas = FakeRootCanvas::default();

        assert!(compose_frame(&mut renderer, &target, &mut canvas));

        assert_eq!(canvas.installs.len(), 1);
        let install = &canvas.installs[0];
        assert_eq!((install.width, install.height), (64, 32));
        assert_eq!(install.bgra.len(), 64 * 32 * 4);
        // top-left pixel of the pattern, red and blue swapped
        assert_eq!(&install.bgra[..4], &[128, 0, 0, 255]);
    }

    #[test]
    fn test_successful_readback_is_swapped() {
        let gpu = FakeGpu::default();
        let mut renderer = Renderer::new(Box::new(gpu));
        let target = renderer.get_or_create_target(2, 1).unwrap();
        let mut canvas = FakeRootCanvas::default();

        assert!(compose_frame(&mut renderer, &target, &mut canvas));
        // the fake reads back opaque red
        assert_eq!(
            canvas.installs[0].bgra,
            vec![0, 0, 255, 255, 0, 0, 255, 255]
        );
    }

    #[test]
    fn test_canvas_failure_reports_false() {
        let mut renderer = Renderer::new(Box::new(FakeGpu::default()));
        let target = renderer.get_or_create_target(8, 8).unwrap();
        let mut canvas = FakeRootCanvas {
            fail: true,
            ..FakeRootCanvas::default()
        };

        assert!(!compose_frame(&mut renderer, &target, &mut canvas));
    }

    #[test]
    fn test_paint_root_without_renderer() {
        let mut renderer = Renderer::new(Box::new(FakeGpu::default()));
        let target = renderer.get_or_create_target(8, 8).unwrap();
        let mut canvas = FakeRootCanvas::default();

        assert!(!paint_root(None, &target, &mut canvas));
        assert!(canvas.installs.is_empty());

        let shared = renderer.into_shared();
        assert!(paint_root(Some(&shared), &target, &mut canvas));

        let _held = shared.borrow_mut();
        assert!(!paint_root(Some(&shared), &target, &mut canvas));
        assert_eq!(canvas.installs.len(), 1);
    }
}
