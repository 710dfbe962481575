//! Classify synthetic gestures with a seeded model.
//!
//! Run with: RUST_LOG=debug cargo run -p ruvector-temporal-gnn --example classify_gesture

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ruvector_temporal_gnn::{
    ClassifierConfig, GestureBatch, GestureClassifier, GestureSample, LayoutConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A point cloud drifting along one axis per frame.
fn synthetic_gesture(rng: &mut StdRng, frames: usize, points: usize, label: usize) -> GestureSample {
    let direction = label % 3;
    let frames = (0..frames)
        .map(|f| {
            Array2::from_shape_fn((points, 3), |(_, axis)| {
                let drift = if axis == direction { 0.1 * f as f32 } else { 0.0 };
                drift + rng.gen_range(-0.05..0.05)
            })
        })
        .collect();
    GestureSample::new(frames, label)
}

fn main() -> ruvector_temporal_gnn::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = ClassifierConfig {
        layout: LayoutConfig {
            batch_size: 4,
            num_points: 8 * 16,
            num_frames: 8,
        },
        seed: Some(42),
        ..Default::default()
    };
    println!("=== Temporal Edge Convolution Demo ===\n");
    println!("{}\n", config.to_json_string()?);

    let model = GestureClassifier::with_stn(config)?;

    let mut rng = StdRng::seed_from_u64(7);
    let samples: Vec<_> = (0..10)
        .map(|i| synthetic_gesture(&mut rng, 8, 16, i % 3))
        .collect();

    for (i, batch) in GestureBatch::batches(&samples, 4)?.iter().enumerate() {
        let out = model.forward(batch.positions.view(), &batch.batch)?;
        let predicted = model.predict(batch.positions.view(), &batch.batch)?;
        println!(
            "batch {i}: {} samples, {} + {} edges",
            batch.len(),
            out.edges[0].len(),
            out.edges[1].len()
        );
        println!("   labels:    {:?}", batch.labels);
        println!("   predicted: {:?}", predicted);
    }

    Ok(())
}
