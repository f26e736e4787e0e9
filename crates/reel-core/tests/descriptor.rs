use anyhow::Result;
use reel_core::types::{Interval, JobDescriptor, Sampling, SamplingKind, SequenceSamples};

#[test]
fn descriptor_records_strided_parameters() {
    let sampling = Sampling::Strided { stride: 5 };
    let desc = JobDescriptor::new(7, &sampling, 10, &["frame".to_string()]);
    assert_eq!(desc.sampling, SamplingKind::Strided);
    assert_eq!(desc.stride, Some(5));
    assert_eq!(desc.gather_points, None);
    assert_eq!(desc.columns.len(), 1);
    assert_eq!(desc.columns[0].name, "frame");
    assert_eq!(desc.columns[0].id, 0);
}

#[test]
fn descriptor_json_round_trip() -> Result<()> {
    let sampling = Sampling::SequenceGather {
        sequences: vec![SequenceSamples {
            video_index: 0,
            intervals: vec![Interval::new(0, 10), Interval::new(50, 60)],
        }],
    };
    let desc = JobDescriptor::new(
        1,
        &sampling,
        20,
        &["frame".to_string(), "histogram".to_string()],
    );
    let bytes = serde_json::to_vec(&desc)?;
    let decoded: JobDescriptor = serde_json::from_slice(&bytes)?;
    assert_eq!(decoded, desc);
    Ok(())
}
