use clap::Parser;
use image::GrayImage;
use log::{info, warn};
use robot_pose_tracker::calibration::Calibration;
use robot_pose_tracker::data_loader::{load_detections, load_image_sequence};
use robot_pose_tracker::init_pose::estimate_pose;
use robot_pose_tracker::model::robot_model;
use robot_pose_tracker::store::load_appearance;
use robot_pose_tracker::tracker::track;
use robot_pose_tracker::types::Pose;
use robot_pose_tracker::visualization::*;
use std::time::Instant;

#[derive(Parser)]
#[command(version, about, author)]
struct TrackCli {
    /// path to image folder
    path: String,

    /// per-frame landmark detections (json), used for (re)acquisition
    detections: String,

    /// camera calibration file (json)
    #[arg(short, long, default_value = "calibration.json")]
    calibration: String,

    /// learned appearance store
    #[arg(short, long, default_value = "appearance.json")]
    appearance: String,

    /// save a rerun recording of the tracking session
    #[arg(long)]
    rerun_file: Option<String>,
}

fn main() {
    env_logger::init();
    let cli = TrackCli::parse();

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

    let mut model = robot_model();
    if let Err(e) = load_appearance(&cli.appearance, &mut model) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let recording = cli.rerun_file.as_ref().map(|p| {
        rerun::RecordingStreamBuilder::new("track-sequence")
            .save(p)
            .unwrap()
    });

    let mut pose: Option<Pose> = None;
    let mut prev_img: Option<&GrayImage> = None;
    let mut tracked_frames = 0usize;
    for (i, (time_ns, img)) in frames.iter().enumerate() {
        if let Some(recording) = &recording {
            recording.set_time_nanos("stable", *time_ns);
            log_image_as_compressed(
                recording,
                "/cam",
                &image::DynamicImage::ImageLuma8(img.clone()),
                image::ImageFormat::Jpeg,
            );
        }

        // Track from the previous frame when possible, otherwise
        // (re)acquire from the landmark detections.
        let mut next_pose = None;
        if let (Some(prev_pose), Some(prev)) = (&pose, prev_img) {
            match track(&model, img, prev, &calib, prev_pose) {
                Ok(out) => {
                    info!(
                        "frame {}: tracked, score {:.3}, {} matches",
                        i,
                        out.score,
                        out.matches.len()
                    );
                    if let Some(recording) = &recording {
                        log_track_outcome(recording, "/cam", &out);
                    }
                    next_pose = Some(out.pose);
                }
                Err(e) => warn!("frame {}: tracking lost: {}", i, e),
            }
        }
        if next_pose.is_none() {
            let empty = Vec::new();
            let frame_detections = detections.get(i).unwrap_or(&empty);
            match estimate_pose(&model, &calib, frame_detections, pose.as_ref()) {
                Ok(out) => {
                    info!(
                        "frame {}: acquired from {}/{} landmark inliers",
                        i,
                        out.inliers.len(),
                        out.total
                    );
                    if let Some(recording) = &recording {
                        log_detections(recording, "/cam", frame_detections);
                    }
                    next_pose = Some(out.pose);
                }
                Err(e) => warn!("frame {}: acquisition failed: {}", i, e),
            }
        }

        if let Some(p) = &next_pose {
            tracked_frames += 1;
            let rvec = p.rvec();
            let tvec = p.tvec();
            println!(
                "{} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6}",
                time_ns, rvec[0], rvec[1], rvec[2], tvec[0], tvec[1], tvec[2]
            );
            if let Some(recording) = &recording {
                log_silhouette(recording, "/cam", &model, &calib, p);
            }
        }
        pose = next_pose;
        prev_img = Some(img);
    }

    info!("tracked {}/{} frames", tracked_frames, frames.len());
}
