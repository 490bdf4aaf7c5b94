//! Debounce, stale-discard and cache behavior of `HighlightSession`
//! under a paused tokio clock.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::io::Write;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::GzEncoder;
use maskglow_pipeline::{
    EncodedMask, HighlightStatus, HighlightStyle, InstanceId, InstanceMasks, MaskPayload,
    RgbaImage, Selection, highlight, raster,
};
use maskglow_session::{HighlightSession, ImageSource, SelectOutcome, SessionConfig, SessionError};
use tokio::task::{LocalSet, spawn_local};
use tokio::time::sleep;

const W: u32 = 32;
const H: u32 = 24;

fn png(shade: u8) -> Vec<u8> {
    raster::encode_png(&RgbaImage::from_pixel(W, H, image::Rgba([shade, shade, shade, 255])))
        .unwrap()
}

fn gz_mask(inside: impl Fn(u32, u32) -> bool) -> MaskPayload {
    let mut samples = Vec::new();
    for y in 0..H {
        for x in 0..W {
            samples.push(u8::from(inside(x, y)));
        }
    }
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&samples).unwrap();
    MaskPayload::Encoded(EncodedMask::new(STANDARD.encode(enc.finish().unwrap())))
}

fn masks() -> InstanceMasks {
    [
        (
            InstanceId::new("shirt"),
            gz_mask(|x, y| (2..14).contains(&x) && (2..20).contains(&y)),
        ),
        (
            InstanceId::new("pants"),
            gz_mask(|x, y| (16..30).contains(&x) && (4..22).contains(&y)),
        ),
    ]
    .into_iter()
    .collect()
}

fn source(shade: u8) -> ImageSource {
    ImageSource::new(png(shade), masks())
}

fn shirt() -> Selection {
    Selection::Instance("shirt".into())
}

fn pants() -> Selection {
    Selection::Instance("pants".into())
}

fn loaded_session() -> HighlightSession {
    let session = HighlightSession::new(SessionConfig::default());
    assert!(session.on_image_changed(source(90)));
    session
}

fn displayed_selection(session: &HighlightSession) -> Selection {
    session.displayed().expect("something displayed").report.selection.clone()
}

#[tokio::test(start_paused = true)]
async fn rapid_selections_composite_only_the_last() {
    LocalSet::new()
        .run_until(async {
            let session = loaded_session();

            let first = spawn_local({
                let s = session.clone();
                async move { s.select(shirt()).await }
            });
            sleep(Duration::from_millis(50)).await;
            let second = spawn_local({
                let s = session.clone();
                async move { s.select(pants()).await }
            });
            sleep(Duration::from_millis(50)).await;
            let third = spawn_local({
                let s = session.clone();
                async move { s.select(Selection::All).await }
            });

            assert!(matches!(first.await.unwrap(), SelectOutcome::Superseded));
            assert!(matches!(second.await.unwrap(), SelectOutcome::Superseded));
            let SelectOutcome::Displayed(outcome) = third.await.unwrap() else {
                panic!("last selection was not displayed");
            };
            assert_eq!(outcome.report.selection, Selection::All);

            let stats = session.stats();
            assert_eq!(stats.composites_started, 1);
            assert_eq!(stats.superseded, 2);
            assert_eq!(displayed_selection(&session), Selection::All);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn selections_outside_the_window_each_render() {
    let session = loaded_session();
    assert!(matches!(
        session.select(shirt()).await,
        SelectOutcome::Displayed(_)
    ));
    assert!(matches!(
        session.select(pants()).await,
        SelectOutcome::Displayed(_)
    ));
    assert_eq!(session.stats().composites_started, 2);
    assert_eq!(displayed_selection(&session), pants());
}

#[tokio::test(start_paused = true)]
async fn reselecting_is_served_from_cache() {
    let session = loaded_session();
    let SelectOutcome::Displayed(first) = session.select(shirt()).await else {
        panic!("shirt not displayed");
    };
    session.select(pants()).await;
    let SelectOutcome::Displayed(again) = session.select(shirt()).await else {
        panic!("shirt not displayed the second time");
    };

    assert!(std::rc::Rc::ptr_eq(&first, &again));
    let stats = session.stats();
    assert_eq!(stats.composites_started, 2);
    assert_eq!(stats.cache_hits, 1);
}

#[test]
fn late_result_never_overwrites_newer_one() {
    let session = loaded_session();
    let bytes = png(90);
    let render = |selection: &Selection| {
        highlight(&bytes, &masks(), selection, &HighlightStyle::NEON).unwrap()
    };

    let older = session.request(shirt());
    let newer = session.request(pants());

    assert!(session.complete(&newer, render(newer.selection())));
    assert!(!session.complete(&older, render(older.selection())));

    assert_eq!(displayed_selection(&session), pants());
    assert_eq!(session.stats().discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn image_change_invalidates_cache_and_in_flight_work() {
    LocalSet::new()
        .run_until(async {
            let session = loaded_session();
            session.select(shirt()).await;
            assert_eq!(session.stats().composites_started, 1);

            let pending = spawn_local({
                let s = session.clone();
                async move { s.select(pants()).await }
            });
            sleep(Duration::from_millis(10)).await;
            assert!(session.on_image_changed(source(180)));
            assert!(session.displayed().is_none());
            assert_eq!(session.selection(), Selection::None);
            assert!(matches!(pending.await.unwrap(), SelectOutcome::Superseded));

            // Same selection on the new image is a miss, not a stale hit.
            session.select(shirt()).await;
            assert_eq!(session.stats().composites_started, 2);
            assert_eq!(session.stats().cache_hits, 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn toggle_clears_active_instance() {
    let session = loaded_session();
    session.toggle("shirt".into()).await;
    assert_eq!(displayed_selection(&session), shirt());

    session.toggle("shirt".into()).await;
    assert_eq!(session.selection(), Selection::None);
    let shown = session.displayed().unwrap();
    assert_eq!(shown.report.selection, Selection::None);
    assert_eq!(shown.report.highlighted_pixels, 0);
}

#[tokio::test(start_paused = true)]
async fn select_without_image_fails() {
    let session = HighlightSession::default();
    assert!(matches!(
        session.select(Selection::All).await,
        SelectOutcome::Failed(SessionError::NoImage)
    ));
}

#[tokio::test(start_paused = true)]
async fn undecodable_image_keeps_prior_display() {
    let session = HighlightSession::default();
    session.on_image_changed(ImageSource::new(b"not an image".to_vec(), masks()));
    assert!(matches!(
        session.select(shirt()).await,
        SelectOutcome::Failed(SessionError::Pipeline(_))
    ));
    assert!(session.displayed().is_none());
}

#[tokio::test(start_paused = true)]
async fn unknown_instance_renders_degraded_passthrough() {
    let session = loaded_session();
    let SelectOutcome::Displayed(outcome) = session.select(Selection::from_key("hat")).await else {
        panic!("passthrough not displayed");
    };
    assert_eq!(outcome.report.status, HighlightStatus::Degraded);
    assert_eq!(outcome.report.highlighted_pixels, 0);
}

#[tokio::test(start_paused = true)]
async fn late_result_for_replaced_masks_is_not_cached() {
    let session = loaded_session();
    let bytes = png(90);
    let old = highlight(&bytes, &masks(), &shirt(), &HighlightStyle::NEON).unwrap();
    let ticket = session.request(shirt());

    // Same image re-detected with a different shirt.
    let redetected: InstanceMasks = [(
        InstanceId::new("shirt"),
        gz_mask(|x, y| (10..17).contains(&x) && (10..17).contains(&y)),
    )]
    .into_iter()
    .collect();
    let expected = highlight(&bytes, &redetected, &shirt(), &HighlightStyle::NEON).unwrap();
    assert!(session.on_image_changed(ImageSource::new(bytes, redetected)));

    assert!(!session.complete(&ticket, old.clone()));

    let SelectOutcome::Displayed(shown) = session.select(shirt()).await else {
        panic!("shirt not displayed");
    };
    let stats = session.stats();
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.composites_started, 1);
    assert_ne!(shown.result.png, old.result.png);
    assert_eq!(shown.result.png, expected.result.png);
    assert_eq!(shown.report.highlighted_pixels, 49);
}
