use super::*;
use crate::events::{ChannelBroadcaster, NoOpBroadcaster};
use crate::metadata::{RedshiftArea, RedshiftAreas, TransformHistory};
use approx::assert_relative_eq;
use solex_math::Point2;

fn disk_image(width: usize, height: usize, ellipse: &Ellipse, value: f32) -> MonoImage {
    let data = Array2::from_shape_fn((height, width), |(y, x)| {
        if ellipse.is_within(x as f64, y as f64) {
            value
        } else {
            0.0
        }
    });
    MonoImage::new(data)
}

fn run(
    corrector: &GeometryCorrector,
    image: &MonoImage,
    ellipse: &Ellipse,
) -> (GeometryResult, Vec<ProcessingEvent>) {
    let (broadcaster, receiver) = ChannelBroadcaster::new();
    let result = corrector
        .correct(image, ellipse, &broadcaster, &InterruptFlag::new())
        .unwrap();
    drop(broadcaster);
    (result, receiver.iter().collect())
}

fn suggestions(events: &[ProcessingEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            ProcessingEvent::Suggestion(s) => Some(s.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_square_untilted_keeps_dimensions() {
    let ellipse = Ellipse::circle(Point2::new(50.0, 50.0), 40.0).unwrap();
    let image = disk_image(100, 100, &ellipse, 1000.0);
    let corrector = GeometryCorrector::new(GeometryParams::default(), 0.0);

    let (result, events) = run(&corrector, &image, &ellipse);
    assert_eq!(result.corrected.width(), 100);
    assert_eq!(result.corrected.height(), 100);
    assert_eq!(result.corrected.data(), image.data());
    assert_eq!(result.tilt, 0.0);
    assert_eq!(result.xy_ratio, 1.0);
    assert_eq!(result.scale, (1.0, 1.0));
    assert!(result.ellipse_refitted);
    assert_relative_eq!(result.ellipse.radius(), 40.0, epsilon = 1e-6);

    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            ProcessingEvent::Progress { fraction, .. } => Some(*fraction),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0.0, 1.0]);
}

#[test]
fn test_circle_skips_rotation_even_with_measured_tilt_noise() {
    // Nearly circular: axis difference below the epsilon, arbitrary rotation
    let ellipse = Ellipse::new(Point2::new(50.0, 50.0), 40.02, 40.0, 0.7).unwrap();
    let corrector = GeometryCorrector::new(GeometryParams::default(), 0.0);
    assert_eq!(corrector.effective_tilt(&ellipse, &NoOpBroadcaster), 0.0);
}

#[test]
fn test_forced_tilt_is_converted_to_radians() {
    let ellipse = Ellipse::circle(Point2::new(50.0, 50.0), 40.0).unwrap();
    let params = GeometryParams {
        tilt_degrees: Some(2.0),
        ..Default::default()
    };
    let corrector = GeometryCorrector::new(params, 0.0);
    assert_relative_eq!(
        corrector.effective_tilt(&ellipse, &NoOpBroadcaster),
        2.0f64.to_radians()
    );
}

#[test]
fn test_shear_is_removed() {
    let circle = Ellipse::circle(Point2::new(50.0, 50.0), 40.0).unwrap();
    let tilted = PixelTransform::shear_x(0.3)
        .apply_to_ellipse(&circle)
        .unwrap();
    let image = disk_image(130, 100, &tilted, 1000.0);
    let corrector = GeometryCorrector::new(GeometryParams::default(), 0.0);

    let (result, events) = run(&corrector, &image, &tilted);
    assert_relative_eq!((-result.tilt).tan(), -0.3, epsilon = 1e-6);
    // 130 + ceil(100 * 0.3)
    assert_eq!(result.corrected.width(), 160);
    assert_eq!(result.corrected.height(), 100);
    assert_relative_eq!(result.ellipse.tilt_angle(), 0.0, epsilon = 1e-6);
    assert_relative_eq!(result.ellipse.radius(), 40.0, epsilon = 1e-6);
    assert_relative_eq!(result.ellipse.center().x, 80.0, epsilon = 1e-6);
    assert_relative_eq!(result.ellipse.center().y, 50.0, epsilon = 1e-6);
    assert_eq!(result.xy_ratio, 1.0);

    assert!(suggestions(&events)
        .iter()
        .any(|s| s.starts_with("Tilt angle is")));
    // The disk center is bright after correction
    assert_relative_eq!(result.corrected.data()[[50, 80]], 1000.0, epsilon = 1e-2);
}

#[test]
fn test_shear_preserves_flat_field() {
    let data = Array2::from_elem((40, 30), 500.0f32);
    let (sheared, offset) = shear_rows(&data, -0.25, &InterruptFlag::new()).unwrap();
    assert_eq!(offset, 10.0);
    assert_eq!(sheared.dim(), (40, 40));
    for v in sheared.iter() {
        assert_relative_eq!(*v, 500.0, epsilon = 1e-3);
    }
}

#[test]
fn test_fractional_shift_splits_between_columns() {
    let mut data = Array2::<f32>::zeros((2, 5));
    data[[1, 2]] = 100.0;
    // Row 1 shifts by 0.5
    let (sheared, _) = shear_rows(&data, 0.5, &InterruptFlag::new()).unwrap();
    assert_relative_eq!(sheared[[1, 2]], 50.0);
    assert_relative_eq!(sheared[[1, 3]], 50.0);
    assert_relative_eq!(sheared.row(1).sum(), 100.0);
}

#[test]
fn test_undersampled_ratio_with_frame_rate() {
    // Horizontally squeezed disk
    let ellipse = Ellipse::new(Point2::new(50.0, 50.0), 20.0, 40.0, 0.0).unwrap();
    let image = disk_image(100, 100, &ellipse, 1000.0);
    let corrector = GeometryCorrector::new(GeometryParams::default(), 0.0).with_frame_rate(Some(100.0));

    let (result, events) = run(&corrector, &image, &ellipse);
    assert_relative_eq!(result.xy_ratio, 0.5, epsilon = 1e-9);
    assert_relative_eq!(result.scale.0, 1.0);
    assert_relative_eq!(result.scale.1, 0.5, epsilon = 1e-9);
    assert_eq!(result.corrected.width(), 100);
    assert_eq!(result.corrected.height(), 50);
    assert_relative_eq!(result.ellipse.radius(), 20.0, epsilon = 1e-6);
    assert_eq!(
        suggestions(&events),
        vec!["Image is undersampled by a factor of 0.50. Try to use 5.00 ms exposure at acquisition instead of 10.00 ms"]
    );
}

#[test]
fn test_disallowed_downsampling_stretches_short_axis() {
    let ellipse = Ellipse::new(Point2::new(50.0, 50.0), 20.0, 40.0, 0.0).unwrap();
    let image = disk_image(100, 100, &ellipse, 1000.0);
    let params = GeometryParams {
        disallow_downsampling: true,
        ..Default::default()
    };
    let (result, events) = run(&GeometryCorrector::new(params, 0.0), &image, &ellipse);
    assert_relative_eq!(result.scale.0, 2.0, epsilon = 1e-9);
    assert_relative_eq!(result.scale.1, 1.0);
    assert_eq!(result.corrected.width(), 200);
    assert_eq!(result.corrected.height(), 100);
    assert_relative_eq!(result.ellipse.radius(), 40.0, epsilon = 1e-6);
    // No frame rate, no suggestion
    assert!(suggestions(&events).is_empty());
}

#[test]
fn test_forced_ratio_has_no_suggestion() {
    let ellipse = Ellipse::new(Point2::new(50.0, 50.0), 20.0, 40.0, 0.0).unwrap();
    let image = disk_image(100, 100, &ellipse, 1000.0);
    let params = GeometryParams {
        xy_ratio: Some(0.5),
        ..Default::default()
    };
    let corrector = GeometryCorrector::new(params, 0.0).with_frame_rate(Some(50.0));
    let (result, events) = run(&corrector, &image, &ellipse);
    assert_eq!(result.xy_ratio, 0.5);
    assert!(suggestions(&events).is_empty());
}

#[test]
fn test_autocrop_radius_mode() {
    let ellipse = Ellipse::circle(Point2::new(60.0, 50.0), 40.0).unwrap();
    let image = disk_image(120, 100, &ellipse, 1000.0);
    let params = GeometryParams {
        autocrop: AutocropMode::Radius1_5,
        ..Default::default()
    };
    let (result, _) = run(&GeometryCorrector::new(params, 7.0), &image, &ellipse);
    // half side = ceil(1.5 * 40) = 60
    assert_eq!(result.corrected.width(), 120);
    assert_eq!(result.corrected.height(), 120);
    assert_relative_eq!(result.ellipse.center().x, 60.0, epsilon = 1e-6);
    assert_relative_eq!(result.ellipse.center().y, 60.0, epsilon = 1e-6);
    // Rows above the source frame are padded with the black point
    assert_eq!(result.corrected.data()[[0, 60]], 7.0);
    assert_eq!(result.corrected.data()[[60, 60]], 1000.0);
    // Reference disk stays in pre-crop coordinates
    assert_relative_eq!(result.disk.center().y, 50.0, epsilon = 1e-6);
    assert_eq!(
        result.corrected.ellipse().map(|e| e.center()),
        Some(result.ellipse.center())
    );
    let history = result.corrected.metadata().get::<TransformHistory>().unwrap();
    assert_eq!(history.0.len(), 2);
}

#[test]
fn test_source_width_crop_out_of_bounds_is_skipped() {
    let ellipse = Ellipse::circle(Point2::new(30.0, 50.0), 20.0).unwrap();
    let image = disk_image(100, 100, &ellipse, 1000.0);
    let params = GeometryParams {
        autocrop: AutocropMode::SourceWidth,
        ..Default::default()
    };
    let (result, events) = run(&GeometryCorrector::new(params, 0.0), &image, &ellipse);
    assert_eq!(result.corrected.width(), 100);
    assert!(events
        .iter()
        .any(|e| matches!(e, ProcessingEvent::Warning(_))));
}

#[test]
fn test_reference_disk_drives_crop() {
    let ellipse = Ellipse::circle(Point2::new(50.0, 50.0), 40.0).unwrap();
    let image = disk_image(100, 100, &ellipse, 1000.0);
    let reference = Ellipse::circle(Point2::new(52.0, 48.0), 20.0).unwrap();
    let params = GeometryParams {
        autocrop: AutocropMode::Radius1_5,
        ..Default::default()
    };
    let corrector = GeometryCorrector::new(params, 0.0).with_reference_disk(Some(reference));
    let (result, _) = run(&corrector, &image, &ellipse);
    assert_eq!(result.corrected.width(), 60);
    assert_eq!(result.disk, reference);
    assert_relative_eq!(result.ellipse.center().x, 50.0 - 22.0, epsilon = 1e-6);
}

#[test]
fn test_redshift_areas_follow_the_transform() {
    let ellipse = Ellipse::new(Point2::new(50.0, 50.0), 40.0, 20.0, 0.0).unwrap();
    let area = RedshiftArea {
        id: "r".to_string(),
        pixel_shift: 4.0,
        relative_speed: 10.0,
        x1: 40,
        y1: 40,
        x2: 60,
        y2: 60,
    };
    let mut image = disk_image(100, 100, &ellipse, 1000.0);
    image
        .metadata_mut()
        .insert(RedshiftAreas(vec![area]));

    let (result, _) = run(
        &GeometryCorrector::new(GeometryParams::default(), 0.0),
        &image,
        &ellipse,
    );
    assert_relative_eq!(result.scale.0, 0.5, epsilon = 1e-9);
    let areas = result.corrected.metadata().get::<RedshiftAreas>().unwrap();
    assert_eq!((areas.0[0].x1, areas.0[0].x2), (20, 30));
    assert_eq!((areas.0[0].y1, areas.0[0].y2), (40, 60));
}

#[test]
fn test_interrupt_aborts_correction() {
    let ellipse = Ellipse::new(Point2::new(50.0, 50.0), 40.0, 20.0, 0.0).unwrap();
    let image = disk_image(100, 100, &ellipse, 1000.0);
    let flag = InterruptFlag::new();
    flag.interrupt();
    let result = GeometryCorrector::new(GeometryParams::default(), 0.0).correct(
        &image,
        &ellipse,
        &NoOpBroadcaster,
        &flag,
    );
    assert!(matches!(result, Err(ProcessingError::Interrupted)));
}

#[test]
fn test_failed_refit_keeps_the_input_ellipse() {
    // Sub-ulp radius: every transformed boundary sample lands on the center
    let ellipse = Ellipse::circle(Point2::new(50.0, 50.0), 1e-17).unwrap();
    let image = MonoImage::new(Array2::from_elem((100, 100), 500.0));
    let params = GeometryParams {
        tilt_degrees: Some(10.0),
        xy_ratio: Some(1.0),
        ..Default::default()
    };
    let corrector = GeometryCorrector::new(params, 0.0);

    let result = corrector
        .correct(&image, &ellipse, &NoOpBroadcaster, &InterruptFlag::new())
        .unwrap();
    assert!(!result.ellipse_refitted);
    assert_eq!(result.ellipse, ellipse);
    assert_eq!(result.corrected.metadata().get::<Ellipse>(), Some(&ellipse));
    assert!(result.corrected.width() > 100);
}
