//! Per-frame pipeline and series orchestration
//!
//! A frame goes through ellipse fitting, banding reduction, black point
//! estimation and geometry correction in order. Once the corrected image is
//! available, the derived products (stretched, colorized, coronagraph and the
//! edge-detection debug image) are spawned on the worker pool and only read
//! the shared [`GeometryResult`]. The Doppler image needs two frames and is
//! composed at the series level.

pub mod batch;

pub use batch::{default_permits, BatchProcessor, PermitGuard, Permits};

use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use rayon::ThreadPool;

use solex_math::{fit_ellipse, Ellipse, Point2};

use crate::banding::reduce_banding;
use crate::black_point::{estimate_black_point, BLACK_POINT_SAFETY_FACTOR};
use crate::compose::{colorize, compose_coronagraph, doppler_composite, edge_detection_image};
use crate::emitter::{ImageEmitter, ImageProduct, ProductKind};
use crate::error::ProcessingError;
use crate::events::{Broadcaster, InterruptFlag, ProcessingEvent};
use crate::geometry::{GeometryCorrector, GeometryResult};
use crate::image::MonoImage;
use crate::metadata::PixelShift;
use crate::params::{ProcessParams, StretchedMode};
use crate::stretching::{
    ArcsinhStrategy, AutohistogramStrategy, CutoffStrategy, LinearStrategy, Stretch,
    StretchingStrategy,
};

/// One reconstructed frame and the limb samples detected on it.
#[derive(Debug, Clone)]
pub struct FrameInput {
    /// Offset from the line center, in pixels
    pub pixel_shift: f64,
    pub image: MonoImage,
    pub samples: Vec<Point2<f64>>,
}

impl FrameInput {
    pub fn new(pixel_shift: f64, image: MonoImage, samples: Vec<Point2<f64>>) -> Self {
        Self {
            pixel_shift,
            image,
            samples,
        }
    }
}

/// What a processed frame leaves behind for the series level.
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub pixel_shift: f64,
    /// Ellipse fitted on the raw frame
    pub ellipse: Ellipse,
    pub black_point: f32,
    pub geometry: Arc<GeometryResult>,
}

pub struct ProcessingWorkflow {
    params: ProcessParams,
    frame_rate: Option<f64>,
    pool: Arc<ThreadPool>,
    broadcaster: Arc<dyn Broadcaster>,
    emitter: Arc<dyn ImageEmitter>,
    interrupt: InterruptFlag,
}

/// Worker pool sized to the machine, threads named `solex-worker-<n>`.
///
/// # Errors
/// `ProcessingError::Failure` if the threads cannot be started.
pub fn worker_pool() -> Result<ThreadPool, ProcessingError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .thread_name(|i| format!("solex-worker-{i}"))
        .build()
        .map_err(|e| ProcessingError::failure("worker pool", e.to_string()))
}

impl ProcessingWorkflow {
    /// Creates a workflow with its own [`worker_pool`].
    ///
    /// # Errors
    /// `ProcessingError::InvalidParameter` when `params` do not validate,
    /// `ProcessingError::Failure` if the worker pool cannot be started.
    pub fn new(
        params: ProcessParams,
        broadcaster: Arc<dyn Broadcaster>,
        emitter: Arc<dyn ImageEmitter>,
    ) -> Result<Self, ProcessingError> {
        params.validate()?;
        Self::in_pool(params, broadcaster, emitter, Arc::new(worker_pool()?))
    }

    /// Creates a workflow running on an existing pool, e.g. one shared by
    /// every frame of a batch.
    ///
    /// # Errors
    /// `ProcessingError::InvalidParameter` when `params` do not validate.
    pub fn in_pool(
        params: ProcessParams,
        broadcaster: Arc<dyn Broadcaster>,
        emitter: Arc<dyn ImageEmitter>,
        pool: Arc<ThreadPool>,
    ) -> Result<Self, ProcessingError> {
        params.validate()?;
        Ok(Self {
            params,
            frame_rate: None,
            pool,
            broadcaster,
            emitter,
            interrupt: InterruptFlag::new(),
        })
    }

    pub fn with_frame_rate(mut self, frame_rate: Option<f64>) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn params(&self) -> &ProcessParams {
        &self.params
    }

    pub fn interrupt_flag(&self) -> &InterruptFlag {
        &self.interrupt
    }

    /// Runs the full pipeline on one frame.
    ///
    /// # Arguments
    /// * `frame` - Reconstructed image and its limb samples
    /// * `reference_disk` - Disk of the first frame of a series, used to crop
    ///   every frame identically
    ///
    /// # Errors
    /// A failed initial ellipse fit, an interrupt, or the first failure of a
    /// derived product. Derived products that succeeded are still emitted.
    pub fn process_frame(
        &self,
        frame: FrameInput,
        reference_disk: Option<Ellipse>,
    ) -> Result<FrameResult, ProcessingError> {
        let FrameInput {
            pixel_shift,
            mut image,
            samples,
        } = frame;
        self.interrupt.check()?;
        log::info!(
            "Processing frame at pixel shift {pixel_shift} ({})",
            image.size()
        );

        self.emit(
            ImageProduct::new(ProductKind::Raw, image.clone(), CutoffStrategy::default()),
            pixel_shift,
        )?;
        self.emit(
            ImageProduct::new(ProductKind::RawLinear, image.clone(), LinearStrategy::default()),
            pixel_shift,
        )?;

        let ellipse = fit_ellipse(&samples)?;
        log::debug!("Fitted disk {ellipse:?} on {} samples", samples.len());
        image.metadata_mut().insert(ellipse);
        image.metadata_mut().insert(PixelShift(pixel_shift));

        let broadcaster = self.broadcaster.as_ref();
        reduce_banding(
            image.data_mut(),
            &ellipse,
            &self.params.banding,
            broadcaster,
            &self.interrupt,
        )?;
        image.metadata_mut().record_step(format!(
            "Banding reduction ({} passes, width {})",
            self.params.banding.passes, self.params.banding.width
        ));

        let black_point =
            estimate_black_point(image.data(), &ellipse) as f32 * BLACK_POINT_SAFETY_FACTOR;
        log::debug!("Black point: {black_point:.2}");

        let geometry = GeometryCorrector::new(self.params.geometry, black_point)
            .with_frame_rate(self.frame_rate)
            .with_reference_disk(reference_disk)
            .correct(&image, &ellipse, broadcaster, &self.interrupt)?;
        let geometry = Arc::new(geometry);

        let corrected = &geometry.corrected;
        broadcaster.broadcast(ProcessingEvent::ImageDimensions {
            label: "geometry corrected".to_string(),
            width: corrected.width(),
            height: corrected.height(),
        });
        self.emit(
            ImageProduct::new(ProductKind::Disk, corrected.clone(), LinearStrategy::default()),
            pixel_shift,
        )?;

        self.produce_derived(&geometry, &samples, black_point, pixel_shift)?;

        Ok(FrameResult {
            pixel_shift,
            ellipse,
            black_point,
            geometry,
        })
    }

    /// Spawns the independent products of a corrected frame and waits for
    /// all of them.
    fn produce_derived(
        &self,
        geometry: &GeometryResult,
        samples: &[Point2<f64>],
        black_point: f32,
        pixel_shift: f64,
    ) -> Result<(), ProcessingError> {
        let errors = Mutex::new(Vec::new());
        let products = self.params.products;
        let run = |task: &'static str, job: &(dyn Fn() -> Result<(), ProcessingError> + Sync)| {
            let outcome = self.interrupt.check().and_then(|_| job());
            if let Err(e) = outcome {
                log::warn!("{task} failed: {e}");
                errors.lock().unwrap_or_else(PoisonError::into_inner).push(e);
            }
        };

        self.pool.scope(|s| {
            if self.params.debug.generate_debug_images {
                s.spawn(|_| {
                    run("Edge detection", &|| {
                        self.produce_edge_detection(geometry, samples, pixel_shift)
                    })
                });
            }
            if products.stretched {
                s.spawn(|_| {
                    run("Stretched image", &|| {
                        self.produce_stretched(geometry, black_point, pixel_shift)
                    })
                });
            }
            if products.colorized {
                s.spawn(|_| {
                    run("Colorized image", &|| {
                        self.produce_colorized(geometry, black_point, pixel_shift)
                    })
                });
            }
            if products.coronagraph {
                s.spawn(|_| {
                    run("Coronagraph", &|| {
                        self.produce_coronagraph(geometry, black_point, pixel_shift)
                    })
                });
            }
        });

        let mut errors = errors.into_inner().unwrap_or_else(PoisonError::into_inner);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.swap_remove(0))
        }
    }

    fn produce_edge_detection(
        &self,
        geometry: &GeometryResult,
        samples: &[Point2<f64>],
        pixel_shift: f64,
    ) -> Result<(), ProcessingError> {
        let moved: Vec<Point2<f64>> = samples.iter().map(|p| geometry.transform.apply(p)).collect();
        let image = edge_detection_image(geometry.corrected.size(), &geometry.ellipse, &moved);
        self.emit(
            ImageProduct::new(ProductKind::EdgeDetection, image, LinearStrategy::default()),
            pixel_shift,
        )
    }

    fn produce_stretched(
        &self,
        geometry: &GeometryResult,
        black_point: f32,
        pixel_shift: f64,
    ) -> Result<(), ProcessingError> {
        let stretch: Stretch = match self.params.products.stretched_mode {
            StretchedMode::Arcsinh => ArcsinhStrategy::new(black_point, 10.0, 100.0)?.into(),
            StretchedMode::Autohistogram => AutohistogramStrategy::default().into(),
        };
        self.emit(
            ImageProduct::new(ProductKind::Stretched, geometry.corrected.clone(), stretch),
            pixel_shift,
        )
    }

    /// Colorized products are stretched in mono first, the color curve then
    /// spans the full range of every channel.
    fn colorized_product(
        &self,
        kind: ProductKind,
        mono: &MonoImage,
        pre_stretch: Option<CutoffStrategy>,
        black_point: f32,
    ) -> Result<Option<ImageProduct>, ProcessingError> {
        let ray = self.params.spectrum.ray;
        let Some(curve) = ray.color_curve() else {
            return Ok(None);
        };
        let mut mono = mono.clone();
        if let Some(cutoff) = pre_stretch {
            cutoff.stretch(&mut mono);
        }
        ArcsinhStrategy::new(black_point, 10.0, 200.0)?.stretch(&mut mono);
        let rgb = colorize(&mono, &curve);
        let title = format!("{} ({})", kind.title(), ray.label());
        Ok(Some(
            ImageProduct::new(kind, rgb, LinearStrategy::default()).with_title(title),
        ))
    }

    fn produce_colorized(
        &self,
        geometry: &GeometryResult,
        black_point: f32,
        pixel_shift: f64,
    ) -> Result<(), ProcessingError> {
        match self.colorized_product(
            ProductKind::Colorized,
            &geometry.corrected,
            Some(CutoffStrategy::default()),
            black_point,
        )? {
            Some(product) => self.emit(product, pixel_shift),
            None => {
                log::debug!("No color curve for {}", self.params.spectrum.ray.label());
                Ok(())
            }
        }
    }

    fn produce_coronagraph(
        &self,
        geometry: &GeometryResult,
        black_point: f32,
        pixel_shift: f64,
    ) -> Result<(), ProcessingError> {
        let composed =
            compose_coronagraph(&geometry.corrected, &geometry.ellipse, black_point, &self.interrupt)?;
        self.emit(
            ImageProduct::new(
                ProductKind::Coronagraph,
                composed.coronagraph,
                LinearStrategy::default(),
            ),
            pixel_shift,
        )?;
        let mix = match self.colorized_product(ProductKind::Mix, &composed.mix, None, black_point)? {
            Some(product) => product,
            None => ImageProduct::new(ProductKind::Mix, composed.mix, LinearStrategy::default()),
        };
        self.emit(mix, pixel_shift)
    }

    fn emit(&self, product: ImageProduct, pixel_shift: f64) -> Result<(), ProcessingError> {
        if product.kind.is_debug() && !self.params.debug.generate_debug_images {
            return Ok(());
        }
        self.emitter.emit(product.with_pixel_shift(pixel_shift))
    }

    /// Processes frames taken at different pixel shifts.
    ///
    /// The first frame runs alone and its disk becomes the crop reference of
    /// the others, which then run in parallel. When both `-shift` and
    /// `+shift` frames succeeded and the line supports it, the Doppler image
    /// is emitted.
    ///
    /// # Returns
    /// One result per input frame, in input order. A failed frame does not
    /// stop the others.
    pub fn process_series(&self, frames: Vec<FrameInput>) -> Vec<Result<FrameResult, ProcessingError>> {
        let mut frames = frames.into_iter();
        let Some(first) = frames.next() else {
            return Vec::new();
        };
        let first = self.process_frame(first, None);
        let reference = match &first {
            Ok(result) => Some(result.geometry.disk),
            Err(e) => {
                log::error!("Reference frame failed, the series is cropped per frame: {e}");
                None
            }
        };

        let rest: Vec<FrameInput> = frames.collect();
        let rest: Vec<_> = self.pool.install(|| {
            rest.into_par_iter()
                .map(|frame| self.process_frame(frame, reference))
                .collect()
        });

        let mut results = Vec::with_capacity(rest.len() + 1);
        results.push(first);
        results.extend(rest);

        if let Err(e) = self.produce_doppler(&results) {
            log::warn!("Doppler image failed: {e}");
            self.broadcaster
                .broadcast(ProcessingEvent::Warning(format!("Doppler image failed: {e}")));
        }
        results
    }

    fn produce_doppler(&self, results: &[Result<FrameResult, ProcessingError>]) -> Result<(), ProcessingError> {
        let spectrum = self.params.spectrum;
        if !self.params.products.doppler || !spectrum.ray.supports_doppler() {
            return Ok(());
        }
        let shift = spectrum.doppler_shift as f64;
        let find = |target: f64| {
            results
                .iter()
                .flatten()
                .find(|r| (r.pixel_shift - target).abs() < 1e-9)
        };
        let (Some(minus), Some(plus)) = (find(-shift), find(shift)) else {
            log::debug!("No frame pair at ±{shift} px, skipping the Doppler image");
            return Ok(());
        };
        let rgb = doppler_composite(&minus.geometry.corrected, &plus.geometry.corrected)?;
        let stretch = ArcsinhStrategy::new(minus.black_point, 1.0, 20.0)?;
        self.emitter
            .emit(ImageProduct::new(ProductKind::Doppler, rgb, stretch))
    }
}
