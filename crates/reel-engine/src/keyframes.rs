use crate::error::EngineError;

/// Maps a `[start_frame, end_frame)` interval to the pair of keyframe indices
/// bounding the smallest self-contained byte range the decoder needs: the
/// greatest index whose position is `<= start_frame` and the least index
/// whose position is `>= end_frame`.
///
/// `keyframe_positions` must carry its trailing frame-count sentinel so the
/// upper bound always exists for in-range intervals.
pub fn find_keyframe_indices(
    start_frame: i64,
    end_frame: i64,
    keyframe_positions: &[i64],
) -> Result<(usize, usize), EngineError> {
    if start_frame < 0 || end_frame <= start_frame {
        return Err(EngineError::CorruptMetadata(format!(
            "invalid frame interval [{start_frame}, {end_frame})"
        )));
    }

    let mut start_index = None;
    for (i, &position) in keyframe_positions.iter().enumerate().skip(1) {
        if position > start_frame {
            start_index = Some(i - 1);
            break;
        }
    }
    let start_index = start_index.ok_or_else(|| {
        EngineError::CorruptMetadata(format!("no keyframe interval covers frame {start_frame}"))
    })?;
    if keyframe_positions[start_index] > start_frame {
        return Err(EngineError::CorruptMetadata(format!(
            "no keyframe at or before frame {start_frame}"
        )));
    }

    let mut end_index = None;
    for (i, &position) in keyframe_positions
        .iter()
        .enumerate()
        .skip(start_index)
    {
        if position >= end_frame {
            end_index = Some(i);
            break;
        }
    }
    let end_index = end_index.ok_or_else(|| {
        EngineError::CorruptMetadata(format!("no keyframe at or after frame {end_frame}"))
    })?;

    Ok((start_index, end_index))
}
