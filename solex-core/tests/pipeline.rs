//! End-to-end runs of the frame pipeline on synthetic solar disks

use std::sync::Arc;

use approx::assert_relative_eq;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use solex_core::compose::doppler_composite;
use solex_core::emitter::{CollectingEmitter, ImageProduct, ProductImage, ProductKind};
use solex_core::events::{ChannelBroadcaster, NoOpBroadcaster};
use solex_core::params::{AutocropMode, StretchedMode};
use solex_core::stretching::GammaStrategy;
use solex_core::workflow::FrameInput;
use solex_core::{
    ImageSize, InterruptFlag, MonoImage, ProcessParams, ProcessingError, ProcessingEvent,
    ProcessingWorkflow, SpectralRay, MAX_PIXEL_VALUE,
};
use solex_math::{Ellipse, PixelTransform, Point2, RegressionError};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Disk of `ellipse` over a dim noisy sky, with a granulation-like texture.
fn synthetic_frame(width: usize, height: usize, ellipse: &Ellipse, seed: u64) -> MonoImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let data = Array2::from_shape_fn((height, width), |(y, x)| {
        let noise: f32 = rng.gen_range(-20.0..20.0);
        if ellipse.is_within(x as f64, y as f64) {
            18000.0 + ((x * 7 + y * 13) % 23) as f32 * 40.0 + noise
        } else {
            600.0 + noise
        }
    });
    MonoImage::new(data)
}

fn tilted_disk() -> Ellipse {
    let circle = Ellipse::circle(Point2::new(50.0, 50.0), 40.0).unwrap();
    PixelTransform::shear_x(0.3).apply_to_ellipse(&circle).unwrap()
}

fn workflow(params: ProcessParams) -> (ProcessingWorkflow, Arc<CollectingEmitter>) {
    let emitter = Arc::new(CollectingEmitter::new());
    let workflow = ProcessingWorkflow::new(params, Arc::new(NoOpBroadcaster), emitter.clone())
        .unwrap()
        .with_frame_rate(Some(100.0));
    (workflow, emitter)
}

fn find(products: &[ImageProduct], kind: ProductKind) -> Option<&ImageProduct> {
    products.iter().find(|p| p.kind == kind)
}

#[test]
fn test_zero_frame_with_four_limb_points() {
    init_logging();
    let (workflow, emitter) = workflow(ProcessParams::default());
    let image = MonoImage::filled(ImageSize::from_width_height(100, 100), 0.0);
    let samples = vec![
        Point2::new(90.0, 50.0),
        Point2::new(50.0, 90.0),
        Point2::new(10.0, 50.0),
        Point2::new(50.0, 10.0),
    ];

    let result = workflow
        .process_frame(FrameInput::new(0.0, image, samples), None)
        .unwrap();

    let (a, b) = result.ellipse.semi_axes();
    assert_relative_eq!(a, 40.0, epsilon = 1e-6);
    assert_relative_eq!(b, 40.0, epsilon = 1e-6);
    assert_eq!(result.geometry.tilt, 0.0);
    assert_eq!(result.geometry.corrected.size(), ImageSize::from_width_height(100, 100));

    let products = emitter.take();
    let disk = find(&products, ProductKind::Disk).unwrap();
    assert_eq!(disk.image.size(), ImageSize::from_width_height(100, 100));
    assert!(find(&products, ProductKind::Raw).is_some());
    assert!(find(&products, ProductKind::RawLinear).is_some());
    // Debug images are off by default
    assert!(find(&products, ProductKind::EdgeDetection).is_none());
}

#[test]
fn test_gamma_below_one_is_invalid() {
    let err = GammaStrategy::new(0.5).unwrap_err();
    assert_eq!(err.name, "gamma");
    assert_eq!(err.value, 0.5);
}

#[test]
fn test_doppler_channels() {
    let size = ImageSize::from_width_height(4, 4);
    let rgb = doppler_composite(&MonoImage::filled(size, 100.0), &MonoImage::filled(size, 300.0)).unwrap();
    assert_eq!((rgb.r[[2, 2]], rgb.g[[2, 2]], rgb.b[[2, 2]]), (100.0, 200.0, 300.0));
}

#[test]
fn test_tilted_disk_is_corrected_and_all_products_emitted() {
    init_logging();
    let mut params = ProcessParams::default();
    params.debug.generate_debug_images = true;
    params.products.stretched_mode = StretchedMode::Autohistogram;
    let (broadcaster, events) = ChannelBroadcaster::new();
    let emitter = Arc::new(CollectingEmitter::new());
    let workflow = ProcessingWorkflow::new(params, Arc::new(broadcaster), emitter.clone()).unwrap();

    let disk = tilted_disk();
    let frame = FrameInput::new(0.0, synthetic_frame(130, 100, &disk, 7), disk.sample_boundary(72));
    let result = workflow.process_frame(frame, None).unwrap();

    let geometry = &result.geometry;
    assert!(geometry.ellipse_refitted);
    assert_relative_eq!(geometry.ellipse.tilt_angle(), 0.0, epsilon = 1e-6);
    let (a, b) = geometry.ellipse.semi_axes();
    assert_relative_eq!(a, 40.0, epsilon = 1e-3);
    assert_relative_eq!(b, 40.0, epsilon = 1e-3);
    assert_eq!(geometry.corrected.size(), ImageSize::from_width_height(160, 100));
    assert!(result.black_point > 0.0);

    let products = emitter.take();
    for kind in [
        ProductKind::Raw,
        ProductKind::RawLinear,
        ProductKind::Disk,
        ProductKind::EdgeDetection,
        ProductKind::Stretched,
        ProductKind::Colorized,
        ProductKind::Coronagraph,
        ProductKind::Mix,
    ] {
        assert!(find(&products, kind).is_some(), "missing {kind:?}");
    }
    let colorized = find(&products, ProductKind::Colorized).unwrap();
    assert_eq!(colorized.title, "Colorized (H-alpha)");
    assert!(matches!(colorized.image, ProductImage::Rgb(_)));
    assert!(matches!(
        find(&products, ProductKind::Mix).unwrap().image,
        ProductImage::Rgb(_)
    ));

    // Rendering is always within range
    let ProductImage::Mono(stretched) = find(&products, ProductKind::Stretched).unwrap().render() else {
        panic!("stretched image should be mono");
    };
    assert!(stretched
        .data()
        .iter()
        .all(|v| (0.0..=MAX_PIXEL_VALUE).contains(v)));

    drop(workflow);
    let events: Vec<ProcessingEvent> = events.try_iter().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, ProcessingEvent::Suggestion(s) if s.starts_with("Tilt angle is"))));
    assert!(events.iter().any(|e| matches!(
        e,
        ProcessingEvent::ImageDimensions { width: 160, height: 100, .. }
    )));
}

#[test]
fn test_mono_mix_without_color_curve() {
    let mut params = ProcessParams::default();
    params.spectrum.ray = SpectralRay::Other;
    let (workflow, emitter) = workflow(params);
    let disk = Ellipse::circle(Point2::new(50.0, 50.0), 35.0).unwrap();
    let frame = FrameInput::new(0.0, synthetic_frame(100, 100, &disk, 3), disk.sample_boundary(36));
    workflow.process_frame(frame, None).unwrap();

    let products = emitter.take();
    assert!(find(&products, ProductKind::Colorized).is_none());
    assert!(matches!(
        find(&products, ProductKind::Mix).unwrap().image,
        ProductImage::Mono(_)
    ));
}

#[test]
fn test_series_reuses_reference_disk_and_builds_doppler() {
    init_logging();
    let mut params = ProcessParams::default();
    params.geometry.autocrop = AutocropMode::Radius1_2;
    let (workflow, emitter) = workflow(params);

    let disk = Ellipse::circle(Point2::new(60.0, 50.0), 35.0).unwrap();
    // The shifted frames see a slightly displaced disk
    let shifted = disk.translate(2.0, 0.0);
    let frames = vec![
        FrameInput::new(0.0, synthetic_frame(120, 100, &disk, 1), disk.sample_boundary(48)),
        FrameInput::new(-3.0, synthetic_frame(120, 100, &shifted, 2), shifted.sample_boundary(48)),
        FrameInput::new(3.0, synthetic_frame(120, 100, &shifted, 3), shifted.sample_boundary(48)),
    ];

    let results = workflow.process_series(frames);
    assert_eq!(results.len(), 3);
    let results: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    // Same crop for every frame
    let sizes: Vec<_> = results.iter().map(|r| r.geometry.corrected.size()).collect();
    assert!(sizes.iter().all(|s| *s == sizes[0]));
    assert_eq!(results[1].geometry.disk, results[0].geometry.disk);

    let products = emitter.take();
    let doppler = find(&products, ProductKind::Doppler).expect("doppler product");
    assert_eq!(doppler.image.size(), sizes[0]);
    assert_eq!(
        products.iter().filter(|p| p.kind == ProductKind::Disk).count(),
        3
    );
    assert!(products
        .iter()
        .filter(|p| p.kind == ProductKind::Disk)
        .any(|p| p.pixel_shift == -3.0));
}

#[test]
fn test_doppler_skipped_outside_h_alpha() {
    let mut params = ProcessParams::default();
    params.spectrum.ray = SpectralRay::CalciumK;
    let (workflow, emitter) = workflow(params);
    let disk = Ellipse::circle(Point2::new(50.0, 50.0), 35.0).unwrap();
    let frames = [0.0, -3.0, 3.0]
        .iter()
        .enumerate()
        .map(|(i, &shift)| {
            FrameInput::new(shift, synthetic_frame(100, 100, &disk, i as u64), disk.sample_boundary(36))
        })
        .collect();

    assert!(workflow.process_series(frames).iter().all(Result::is_ok));
    assert!(find(&emitter.take(), ProductKind::Doppler).is_none());
}

#[test]
fn test_failed_fit_is_reported_for_that_frame_only() {
    let (workflow, _) = workflow(ProcessParams::default());
    let disk = Ellipse::circle(Point2::new(50.0, 50.0), 35.0).unwrap();
    let frames = vec![
        FrameInput::new(0.0, synthetic_frame(100, 100, &disk, 1), disk.sample_boundary(36)),
        FrameInput::new(1.0, synthetic_frame(100, 100, &disk, 2), vec![Point2::new(1.0, 1.0)]),
    ];
    let results = workflow.process_series(frames);
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(ProcessingError::Regression(RegressionError::TooFewPoints { .. }))
    ));
}

#[test]
fn test_interrupted_workflow() {
    let (workflow, emitter) = workflow(ProcessParams::default());
    let flag = InterruptFlag::new();
    let workflow = workflow.with_interrupt(flag.clone());
    flag.interrupt();

    let disk = Ellipse::circle(Point2::new(50.0, 50.0), 35.0).unwrap();
    let frame = FrameInput::new(0.0, synthetic_frame(100, 100, &disk, 1), disk.sample_boundary(36));
    assert!(matches!(
        workflow.process_frame(frame, None),
        Err(ProcessingError::Interrupted)
    ));
    assert!(emitter.take().is_empty());
}

#[test]
fn test_invalid_params_are_rejected_up_front() {
    let mut params = ProcessParams::default();
    params.geometry.xy_ratio = Some(-1.0);
    let result = ProcessingWorkflow::new(
        params,
        Arc::new(NoOpBroadcaster),
        Arc::new(CollectingEmitter::new()),
    );
    assert!(matches!(result, Err(ProcessingError::InvalidParameter(_))));
}

#[test]
fn test_extreme_forced_ratio_is_rejected_before_resampling() {
    for ratio in [0.001, 1e6] {
        let mut params = ProcessParams::default();
        params.geometry.xy_ratio = Some(ratio);
        params.geometry.disallow_downsampling = true;
        let result = ProcessingWorkflow::new(
            params,
            Arc::new(NoOpBroadcaster),
            Arc::new(CollectingEmitter::new()),
        );
        match result {
            Err(ProcessingError::InvalidParameter(e)) => assert_eq!(e.name, "geometry.xy_ratio"),
            other => panic!("ratio {ratio} accepted: {:?}", other.err()),
        }
    }
}

#[test]
fn test_workflows_share_one_pool() {
    let pool = Arc::new(solex_core::workflow::worker_pool().unwrap());
    let disk = Ellipse::circle(Point2::new(50.0, 50.0), 35.0).unwrap();
    for seed in 0..2 {
        let emitter = Arc::new(CollectingEmitter::new());
        let workflow = ProcessingWorkflow::in_pool(
            ProcessParams::default(),
            Arc::new(NoOpBroadcaster),
            emitter.clone(),
            pool.clone(),
        )
        .unwrap();
        let frame = FrameInput::new(0.0, synthetic_frame(100, 100, &disk, seed), disk.sample_boundary(36));
        workflow.process_frame(frame, None).unwrap();
        assert!(find(&emitter.take(), ProductKind::Coronagraph).is_some());
    }
}
