//! Background PNG writer and the emitter feeding it.
//!
//! Products are rendered on the pipeline threads, converted to 16 bit and
//! handed to a small pool of writer threads over a bounded channel. A full
//! queue blocks the producer instead of dropping images.

use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender};
use image::{ImageBuffer, Luma, Rgb};
use ndarray::Array2;

use solex_core::emitter::{ImageEmitter, ImageProduct, ProductImage};
use solex_core::{ProcessingError, MAX_PIXEL_VALUE};

pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;
pub type Rgb16Image = ImageBuffer<Rgb<u16>, Vec<u16>>;

#[derive(Debug)]
enum Payload {
    Gray(Gray16Image),
    Rgb(Rgb16Image),
}

struct WriteTask {
    payload: Payload,
    filepath: PathBuf,
}

fn to_u16(value: f32) -> u16 {
    value.clamp(0.0, MAX_PIXEL_VALUE).round() as u16
}

/// Converts a `[row, column]` array to a 16 bit grayscale image.
pub fn array2_to_gray16_image(arr: &Array2<f32>) -> Gray16Image {
    let (height, width) = arr.dim();
    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        Luma([to_u16(arr[[y as usize, x as usize]])])
    })
}

/// Interleaves three channel arrays into a 16 bit RGB image.
pub fn channels_to_rgb16_image(r: &Array2<f32>, g: &Array2<f32>, b: &Array2<f32>) -> Rgb16Image {
    let (height, width) = r.dim();
    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let at = [y as usize, x as usize];
        Rgb([to_u16(r[at]), to_u16(g[at]), to_u16(b[at])])
    })
}

fn save_image(payload: &Payload, filepath: &Path) -> Result<()> {
    if let Some(parent) = filepath.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    match payload {
        Payload::Gray(image) => image.save(filepath)?,
        Payload::Rgb(image) => image.save(filepath)?,
    }
    Ok(())
}

/// Pool of threads writing PNG files.
pub struct PngWriter {
    sender: Sender<WriteTask>,
    workers: Vec<JoinHandle<()>>,
    failures: Arc<AtomicUsize>,
}

impl PngWriter {
    pub fn new(num_workers: usize, buffer_size: usize) -> Self {
        let (sender, receiver) = bounded::<WriteTask>(buffer_size.max(1));
        let failures = Arc::new(AtomicUsize::new(0));

        let workers = (0..num_workers.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let failures = failures.clone();
                std::thread::spawn(move || {
                    log::debug!("PNG writer {worker_id} started");
                    while let Ok(task) = receiver.recv() {
                        match save_image(&task.payload, &task.filepath) {
                            Ok(()) => log::info!("Wrote {}", task.filepath.display()),
                            Err(e) => {
                                failures.fetch_add(1, Ordering::Relaxed);
                                log::warn!(
                                    "Writer {worker_id} failed to save {}: {e:#}",
                                    task.filepath.display()
                                );
                            }
                        }
                    }
                    log::debug!("PNG writer {worker_id} shutting down");
                })
            })
            .collect();

        Self {
            sender,
            workers,
            failures,
        }
    }

    fn submit(&self, payload: Payload, filepath: PathBuf) -> Result<(), ProcessingError> {
        self.sender
            .send(WriteTask { payload, filepath })
            .map_err(|_| ProcessingError::failure("png writer", "writer threads have shut down"))
    }

    /// Waits for the queue to drain.
    ///
    /// # Returns
    /// Number of files that could not be written.
    pub fn wait_for_completion(mut self) -> usize {
        mem::drop(self.sender);
        for (worker_id, handle) in self.workers.drain(..).enumerate() {
            if handle.join().is_err() {
                log::warn!("PNG writer {worker_id} panicked");
            }
        }
        self.failures.load(Ordering::Relaxed)
    }
}

/// Writes the products of one input file as `<stem>_<product>.png`.
///
/// Frames of a series carry their pixel shift in the name.
pub struct FileEmitter {
    writer: Arc<PngWriter>,
    directory: PathBuf,
    stem: String,
    tag_shift: bool,
}

impl FileEmitter {
    pub fn new(writer: Arc<PngWriter>, directory: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            writer,
            directory: directory.into(),
            stem: stem.into(),
            tag_shift: false,
        }
    }

    pub fn with_shift_in_name(mut self) -> Self {
        self.tag_shift = true;
        self
    }

    pub fn file_path(&self, product: &ImageProduct) -> PathBuf {
        let name = product.kind.file_name();
        let file = if self.tag_shift {
            format!("{}_{name}_{}.png", self.stem, shift_label(product.pixel_shift))
        } else {
            format!("{}_{name}.png", self.stem)
        };
        self.directory.join(file)
    }
}

fn shift_label(shift: f64) -> String {
    if shift.fract() == 0.0 {
        format!("{shift:+.0}")
    } else {
        format!("{shift:+.2}")
    }
}

impl ImageEmitter for FileEmitter {
    fn emit(&self, product: ImageProduct) -> Result<(), ProcessingError> {
        let filepath = self.file_path(&product);
        let payload = match product.render() {
            ProductImage::Mono(image) => Payload::Gray(array2_to_gray16_image(image.data())),
            ProductImage::Rgb(image) => {
                Payload::Rgb(channels_to_rgb16_image(&image.r, &image.g, &image.b))
            }
        };
        self.writer.submit(payload, filepath)
    }
}
