use clap::Parser;
use log::{info, warn};
use robot_pose_tracker::appearance::{allocate_learning, finalize_learning, learn_appearance};
use robot_pose_tracker::calibration::Calibration;
use robot_pose_tracker::data_loader::{load_detections, load_image_sequence};
use robot_pose_tracker::init_pose::estimate_pose;
use robot_pose_tracker::model::robot_model;
use robot_pose_tracker::store::write_appearance;
use robot_pose_tracker::types::Pose;
use robot_pose_tracker::visualization::*;
use std::time::Instant;

#[derive(Parser)]
#[command(version, about, author)]
struct LearnCli {
    /// path to image folder
    path: String,

    /// per-frame landmark detections (json)
    detections: String,

    /// camera calibration file (json)
    #[arg(short, long, default_value = "calibration.json")]
    calibration: String,

    /// output appearance store
    #[arg(short, long, default_value = "appearance.json")]
    output: String,

    /// save a rerun recording of the learning session
    #[arg(long)]
    rerun_file: Option<String>,
}

fn main() {
    env_logger::init();
    let cli = LearnCli::parse();

    let mut calib = match Calibration::from_file(&cli.calibration) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let now = Instant::now();
    let frames = load_image_sequence(&cli.path);
    info!(
        "loaded {} frames in {:.3} sec",
        frames.len(),
        now.elapsed().as_secs_f64()
    );
    if frames.is_empty() {
        eprintln!("no images found in {}", cli.path);
        std::process::exit(1);
    }
    let detections = match load_detections(&cli.detections) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let (w, h) = (frames[0].1.width(), frames[0].1.height());
    if (w, h) != calib.image_size() {
        info!("rescaling calibration to {}x{}", w, h);
        calib.rescale(w, h);
    }

    let recording = cli.rerun_file.as_ref().map(|p| {
        rerun::RecordingStreamBuilder::new("learn-appearance")
            .save(p)
            .unwrap()
    });

    let mut model = robot_model();
    allocate_learning(&mut model);

    let mut prev_pose: Option<Pose> = None;
    let mut learned_frames = 0usize;
    for (i, (time_ns, img)) in frames.iter().enumerate() {
        let empty = Vec::new();
        let frame_detections = detections.get(i).unwrap_or(&empty);
        let pose = match estimate_pose(&model, &calib, frame_detections, prev_pose.as_ref()) {
            Ok(out) => {
                info!(
                    "frame {}: pose from {}/{} landmark inliers",
                    i,
                    out.inliers.len(),
                    out.total
                );
                out.pose
            }
            Err(e) => {
                warn!("frame {}: {}", i, e);
                prev_pose = None;
                continue;
            }
        };

        learn_appearance(&mut model, img, &calib, &pose);
        learned_frames += 1;
        prev_pose = Some(pose);

        if let Some(recording) = &recording {
            recording.set_time_nanos("stable", *time_ns);
            log_image_as_compressed(
                recording,
                "/cam",
                &image::DynamicImage::ImageLuma8(img.clone()),
                image::ImageFormat::Jpeg,
            );
            log_detections(recording, "/cam", frame_detections);
            log_silhouette(recording, "/cam", &model, &calib, &pose);
        }
    }

    finalize_learning(&mut model);
    info!(
        "learned appearance from {}/{} frames",
        learned_frames,
        frames.len()
    );
    if let Err(e) = write_appearance(&cli.output, &model) {
        eprintln!("{e}");
        std::process::exit(1);
    }
    println!("appearance written to {}", cli.output);
}
