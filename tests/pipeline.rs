use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use edgeframe::capture::convert::concat_planes;
use edgeframe::capture::device::{Size, Surface};
use edgeframe::capture::pattern::{test_pattern, CHROMA_NEUTRAL};
use edgeframe::capture::virtual_camera::{synthetic_image, Fault};
use edgeframe::capture::{FrameOrigin, VirtualCamera};
use edgeframe::processor::LoggingProcessor;
use edgeframe::{CaptureConfig, Frame, FrameSource, ProcessingSession, SessionState, SourceMode};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("edgeframe=debug")
        .with_test_writer()
        .try_init();
}

fn collect(source: &FrameSource<VirtualCamera>) -> Arc<Mutex<Vec<Frame>>> {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    source.set_frame_callback(move |frame: &Frame| sink.lock().unwrap().push(frame.clone()));
    frames
}

fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

#[test]
fn mock_mode_streams_ten_frames_a_second() {
    init_tracing();
    let mut source = FrameSource::new(
        VirtualCamera::with_back_camera(Size::new(640, 480)),
        CaptureConfig::default(),
    );
    let frames = collect(&source);

    source.enable_mock_mode().unwrap();
    thread::sleep(Duration::from_millis(1000));
    source.close();

    let frames = frames.lock().unwrap().clone();
    assert!((9..=11).contains(&frames.len()), "got {} frames", frames.len());

    let expected = test_pattern(640, 480);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.meta.origin, FrameOrigin::Mock);
        assert_eq!(frame.meta.sequence, i as u64 + 1);
        assert_eq!(frame.data.len(), 460_800);
        assert_eq!(frame.data, expected);
    }
    assert!(frames[0].chroma().iter().all(|&b| b == CHROMA_NEUTRAL));
}

#[test]
fn nothing_is_delivered_after_close_returns() {
    init_tracing();
    let mut source = FrameSource::new(
        VirtualCamera::with_back_camera(Size::new(64, 48)),
        CaptureConfig {
            target_width: 64,
            target_height: 48,
            mock_period_ms: 5,
            ..CaptureConfig::default()
        },
    );
    let frames = collect(&source);

    source.open().unwrap();
    assert!(wait_until(|| frames.lock().unwrap().len() >= 5));
    source.close();
    let seen = frames.lock().unwrap().len();

    thread::sleep(Duration::from_millis(100));
    assert_eq!(frames.lock().unwrap().len(), seen);
    assert_eq!(source.status().session, SessionState::Closed);
}

#[test]
fn live_frames_are_the_camera_planes_back_to_back() {
    init_tracing();
    let size = Size::new(64, 48);
    let camera = VirtualCamera::with_back_camera(size).with_frame_interval(Duration::from_millis(5));
    let probe = camera.probe();
    let mut source = FrameSource::new(
        camera,
        CaptureConfig {
            mode: SourceMode::Live,
            target_width: 64,
            target_height: 48,
            ..CaptureConfig::default()
        },
    );
    source.set_preview_surface(Surface::new(7, "preview"));
    let frames = collect(&source);

    source.open().unwrap();
    assert!(wait_until(|| frames.lock().unwrap().len() >= 5));
    source.close();

    let candidates: Vec<_> = (0..probe.images_produced() + 1)
        .map(|i| concat_planes(&synthetic_image(size, i).planes).unwrap())
        .collect();
    let frames = frames.lock().unwrap();
    for frame in frames.iter() {
        assert_eq!(frame.meta.origin, FrameOrigin::Live);
        assert!(candidates.contains(&frame.data));
    }

    // Sequence numbers only move forward, even when images were overwritten
    assert!(frames
        .windows(2)
        .all(|w| w[0].meta.sequence < w[1].meta.sequence));
    let stats = source.delivery().stats();
    assert_eq!(stats.delivered, frames.len() as u64);
}

#[test]
fn faults_end_closed_with_nothing_held() {
    init_tracing();
    for fault in [
        Fault::DenyAccess,
        Fault::InUse,
        Fault::FailConfigure,
        Fault::FailRepeating,
        Fault::DisconnectAfter(Duration::from_millis(30)),
    ] {
        let camera = VirtualCamera::with_back_camera(Size::new(64, 48)).with_fault(fault);
        let probe = camera.probe();
        let mut source = FrameSource::new(
            camera,
            CaptureConfig {
                mode: SourceMode::Live,
                target_width: 64,
                target_height: 48,
                ..CaptureConfig::default()
            },
        );
        source.set_preview_surface(Surface::new(7, "preview"));
        source.open().unwrap();

        assert!(
            wait_until(|| probe.reader_close_calls() == 1
                && source.status().session == SessionState::Closed),
            "{fault:?}"
        );
        assert!(probe.device_close_calls() <= 1, "{fault:?}");
        assert!(probe.session_close_calls() <= 1, "{fault:?}");
    }
}

#[test]
fn session_runs_the_demo_setup() {
    init_tracing();
    let source = FrameSource::new(
        VirtualCamera::with_back_camera(Size::new(640, 480)),
        CaptureConfig {
            mock_period_ms: 20,
            ..CaptureConfig::default()
        },
    );
    let mut session =
        ProcessingSession::start(source, LoggingProcessor::default(), Duration::from_millis(200))
            .unwrap();

    assert!(wait_until(|| session.fps() > 0.0));
    session.shutdown();

    assert_eq!(session.status().session, SessionState::Closed);
    assert!(!session.source().is_worker_running());
    assert!(session.delivery_stats().delivered >= 10);
}
