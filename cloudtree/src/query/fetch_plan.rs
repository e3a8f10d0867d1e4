use std::collections::VecDeque;

use log::debug;

use crate::cache::FetchInfo;
use crate::filter::Filter;
use crate::reader::Reader;
use crate::tree::{Climber, QueryChunkState};

/// Walks the cold tree once and lists, in pre-order, every existing chunk
/// the query may need.
///
/// Branches are cut where the filter rejects a node or where a cold chunk
/// does not exist, since nothing below a missing chunk is stored either.
pub(crate) fn plan_fetches(
    reader: &Reader,
    filter: &Filter,
    depth_begin: u32,
    depth_end: u32,
) -> VecDeque<FetchInfo> {
    let metadata = reader.metadata();
    let structure = metadata.structure();
    let mut plan = VecDeque::new();

    if !structure.has_cold() || depth_end <= structure.cold_depth_begin() {
        return plan;
    }
    let depth_end = depth_end.min(structure.depth_limit());

    let mut stack = vec![QueryChunkState::new(structure, *metadata.bounds())];
    while let Some(state) = stack.pop() {
        if !filter.check_bounds(state.bounds()) {
            continue;
        }

        let depth = state.depth();
        if let Some(chunk_id) = structure.chunk_id(&state.address()) {
            if !reader.exists(chunk_id) {
                continue;
            }
            if depth >= depth_begin {
                plan.push_back(FetchInfo {
                    source: reader.source().clone(),
                    schema: reader.schema().clone(),
                    chunk_id,
                    bounds: *state.bounds(),
                    depth,
                });
            }
        }

        if depth + 1 < depth_end {
            stack.extend(state.children().into_iter().rev());
        }
    }

    debug!(
        "Planned {} chunk fetches for {} in depths [{}, {})",
        plan.len(),
        reader.path(),
        depth_begin,
        depth_end
    );
    plan
}
