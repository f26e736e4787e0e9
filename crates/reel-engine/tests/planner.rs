use reel_core::types::{
    Interval, LoadEntry, PointSamples, Sampling, SequenceSamples, VideoMetadata,
};
use reel_engine::planner::plan_work;

fn video(frames: i64, keyframes: &[i64]) -> VideoMetadata {
    let mut meta = VideoMetadata {
        frames,
        width: 64,
        height: 48,
        file_size: (frames * 8) as u64,
        keyframe_positions: keyframes.to_vec(),
        keyframe_byte_offsets: keyframes.iter().map(|k| k * 8).collect(),
    };
    meta.ensure_sentinels();
    meta
}

#[test]
fn all_sampling_chunks_each_video_by_work_item_size() {
    let plan = plan_work(&[video(100, &[0, 40, 80])], &Sampling::All, 30).unwrap();

    let intervals: Vec<Interval> = plan
        .load_items
        .iter()
        .map(|item| match &item.entry {
            LoadEntry::All { interval } => *interval,
            other => panic!("unexpected entry {other:?}"),
        })
        .collect();
    assert_eq!(
        intervals,
        vec![
            Interval::new(0, 30),
            Interval::new(30, 60),
            Interval::new(60, 90),
            Interval::new(90, 100),
        ]
    );
    assert_eq!(plan.total_rows, 100);

    for (index, item) in plan.work_items.iter().enumerate() {
        assert_eq!(plan.load_items[index].work_item_index, index as i64);
        assert_eq!(item.video_index, 0);
        assert_eq!(item.rows_from_start, intervals[index].start);
        assert_eq!(item.item_id, intervals[index].start);
        assert_eq!(item.next_item_id, intervals[index].end);
    }
}

#[test]
fn all_sampling_covers_every_frame_exactly_once() {
    let videos = [video(100, &[0, 40, 80]), video(45, &[0, 30])];
    let plan = plan_work(&videos, &Sampling::All, 30).unwrap();

    let mut rows_per_video = vec![Vec::new(); videos.len()];
    for (item, load) in plan.work_items.iter().zip(plan.load_items.iter()) {
        let LoadEntry::All { interval } = &load.entry else {
            panic!("unexpected entry");
        };
        rows_per_video[item.video_index].extend(interval.start..interval.end);
    }
    assert_eq!(rows_per_video[0], (0..100).collect::<Vec<i64>>());
    assert_eq!(rows_per_video[1], (0..45).collect::<Vec<i64>>());
}

#[test]
fn strided_sampling_allocates_input_frames_per_output_row() {
    let sampling = Sampling::Strided { stride: 5 };
    let plan = plan_work(&[video(100, &[0, 40, 80])], &sampling, 10).unwrap();

    assert_eq!(plan.work_items.len(), 2);
    let first = &plan.load_items[0];
    let second = &plan.load_items[1];
    assert_eq!(
        first.entry,
        LoadEntry::Strided {
            interval: Interval::new(0, 50),
            stride: 5,
        }
    );
    assert_eq!(
        second.entry,
        LoadEntry::Strided {
            interval: Interval::new(50, 100),
            stride: 5,
        }
    );
    assert_eq!(plan.work_items[0].rows_from_start, 0);
    assert_eq!(plan.work_items[1].rows_from_start, 10);
    assert_eq!(plan.total_rows, 20);
}

#[test]
fn gather_sampling_chunks_point_runs() {
    let sampling = Sampling::Gather {
        points: vec![PointSamples {
            video_index: 0,
            frames: vec![2, 7, 45, 47, 90],
        }],
    };
    let plan = plan_work(&[video(100, &[0, 40, 80])], &sampling, 2).unwrap();

    let point_runs: Vec<Vec<i64>> = plan
        .load_items
        .iter()
        .map(|item| match &item.entry {
            LoadEntry::Gather { points } => points.clone(),
            other => panic!("unexpected entry {other:?}"),
        })
        .collect();
    assert_eq!(point_runs, vec![vec![2, 7], vec![45, 47], vec![90]]);
    assert_eq!(plan.total_rows, 5);
    assert_eq!(plan.work_items[1].rows_from_start, 2);
    // Consecutive runs of one sample stay in the same stream.
    assert_eq!(plan.work_items[0].next_item_id, plan.work_items[1].item_id);
}

#[test]
fn sequence_gather_forces_reset_at_interval_boundaries() {
    let sampling = Sampling::SequenceGather {
        sequences: vec![SequenceSamples {
            video_index: 0,
            intervals: vec![Interval::new(0, 10), Interval::new(50, 60)],
        }],
    };
    let plan = plan_work(&[video(100, &[0, 40, 80])], &sampling, 20).unwrap();

    assert_eq!(plan.work_items.len(), 2);
    assert_eq!(plan.work_items[0].next_item_id, -1);
    assert_eq!(plan.work_items[1].next_item_id, -1);
    assert_eq!(plan.work_items[1].item_id, 10);
    assert_eq!(plan.work_items[1].rows_from_start, 0);
    assert_eq!(
        plan.load_items[1].entry,
        LoadEntry::SequenceGather {
            intervals: vec![Interval::new(50, 60)],
        }
    );
    assert_eq!(plan.total_rows, 20);
}

#[test]
fn sequence_gather_splits_long_intervals_into_streamed_chunks() {
    let sampling = Sampling::SequenceGather {
        sequences: vec![SequenceSamples {
            video_index: 0,
            intervals: vec![Interval::new(10, 90)],
        }],
    };
    let plan = plan_work(&[video(100, &[0, 40, 80])], &sampling, 30).unwrap();

    assert_eq!(plan.work_items.len(), 3);
    // Chunks of one interval continue the stream; only the last resets.
    assert_eq!(plan.work_items[0].next_item_id, plan.work_items[1].item_id);
    assert_eq!(plan.work_items[1].next_item_id, plan.work_items[2].item_id);
    assert_eq!(plan.work_items[2].next_item_id, -1);
    assert_eq!(plan.total_rows, 80);
}
