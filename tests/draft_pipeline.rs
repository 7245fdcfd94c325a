use framecast::{
    CancelToken, ClipRecord, Draft, FramecastError, MemorySink, NULL_FRAME_HASH, RenderOptions,
    frame_hash, render_batch,
};

const TWO_LAYER_DRAFT: &str = r#"{
    "Name": "two layers",
    "relativeResolution": { "Width": 8, "Height": 8 },
    "targetFrameRate": 30.0,
    "Clips": [
        {
            "ClipType": "SolidColor",
            "Id": "red-base",
            "LayerIndex": 0,
            "StartFrame": 0,
            "Duration": 10,
            "R": 65535, "G": 0, "B": 0, "A": 1.0
        },
        {
            "ClipType": "SolidColor",
            "Id": "blue-top",
            "LayerIndex": 1,
            "StartFrame": 0,
            "Duration": 10,
            "R": 0, "G": 0, "B": 65535, "A": 0.5
        }
    ]
}"#;

fn clips_of(json: &str) -> Vec<ClipRecord> {
    let draft = Draft::from_json(json).unwrap();
    draft
        .clips
        .iter()
        .map(|c| {
            let mut clip = ClipRecord::from_draft(c).unwrap();
            clip.re_init().unwrap();
            clip
        })
        .collect()
}

#[test]
fn half_alpha_top_blends_evenly_over_opaque_base() {
    let clips = clips_of(TWO_LAYER_DRAFT);
    let opts = RenderOptions::new(8, 8);
    let mut sink = MemorySink::default();
    let stats = render_batch(&clips, 0..1, &opts, &mut sink, None, &CancelToken::new()).unwrap();
    assert_eq!(stats.frames_rendered, 1);

    let frame = &sink.frames[0].1;
    let half = (65535.0f32 * 0.5).round() as u16;
    for i in 0..frame.pixel_count() {
        assert_eq!(frame.r()[i], half, "pixel {i} red");
        assert_eq!(frame.g()[i], 0, "pixel {i} green");
        assert_eq!(frame.b()[i], half, "pixel {i} blue");
        assert_eq!(frame.alpha_at(i), 1.0, "pixel {i} alpha");
    }
}

#[test]
fn same_layer_conflict_fails_only_where_both_are_active() {
    let json = r#"{
        "Name": "conflict",
        "relativeResolution": { "Width": 4, "Height": 4 },
        "targetFrameRate": 30.0,
        "Clips": [
            {
                "ClipType": "SolidColor", "Id": "first",
                "LayerIndex": 0, "StartFrame": 0, "Duration": 100,
                "R": 1, "G": 1, "B": 1, "A": 1.0
            },
            {
                "ClipType": "SolidColor", "Id": "second",
                "LayerIndex": 0, "StartFrame": 50, "Duration": 100,
                "R": 2, "G": 2, "B": 2, "A": 1.0
            }
        ]
    }"#;
    let clips = clips_of(json);

    let mut opts = RenderOptions::new(4, 4);
    opts.strict = true;

    // Frame 60 sits in both spans.
    let mut sink = MemorySink::default();
    let err = render_batch(&clips, 60..61, &opts, &mut sink, None, &CancelToken::new());
    match err {
        Err(FramecastError::Overlap(msg)) => {
            assert!(msg.contains("first") && msg.contains("second") && msg.contains("60"));
        }
        other => panic!("expected overlap error, got {other:?}"),
    }

    // Frame 120 only selects the second clip.
    let mut sink = MemorySink::default();
    let stats = render_batch(&clips, 120..121, &opts, &mut sink, None, &CancelToken::new()).unwrap();
    assert_eq!(stats.frames_rendered, 1);
    assert_eq!(sink.frames[0].1.r()[0], 2);
}

#[test]
fn frame_hash_is_stable_and_distinguishes_frames() {
    let clips = clips_of(TWO_LAYER_DRAFT);

    let h5a = frame_hash(&clips, 5).unwrap();
    let h5b = frame_hash(&clips, 5).unwrap();
    assert_eq!(h5a, h5b);
    assert!(h5a.starts_with("0x"));

    let h6 = frame_hash(&clips, 6).unwrap();
    assert_ne!(h5a, h6, "frame number participates in the hash");

    // Past every clip the layer set is empty.
    assert_eq!(frame_hash(&clips, 99).unwrap(), NULL_FRAME_HASH);
}

#[test]
fn invalid_draft_is_rejected_before_rendering() {
    let json = r#"{
        "Name": "broken",
        "relativeResolution": { "Width": 4, "Height": 4 },
        "targetFrameRate": 30.0,
        "Clips": [
            {
                "ClipType": "Video", "Id": "missing-path",
                "LayerIndex": 0, "StartFrame": 0, "Duration": 10
            }
        ]
    }"#;
    assert!(matches!(
        Draft::from_json(json),
        Err(FramecastError::InvalidParameter(_))
    ));
}
