//! Retrieval stage
//!
//! Runs the dispatched connector tasks concurrently and joins on all of them
//! before anything is merged into the state. Connectors report failures as
//! values, so a task always produces a result.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{debug, info};
use tripwise_common::metrics;

use crate::context::AppContext;
use crate::events::{Phase, Progress, ProgressSink};
use crate::state::{ConversationState, RetrievalResult, SourceKind, VisaOutcome};
use crate::trip::TripContext;

/// Run every task concurrently and return their results in task order
pub async fn run_tasks(
    ctx: &AppContext,
    tasks: &[SourceKind],
    query: &str,
    trip: Option<&TripContext>,
    sink: &dyn ProgressSink,
) -> Vec<RetrievalResult> {
    let futures: Vec<BoxFuture<'_, RetrievalResult>> = tasks
        .iter()
        .map(|kind| match kind {
            SourceKind::Knowledge => search_knowledge(ctx, query, sink).boxed(),
            SourceKind::Web => search_web(ctx, query, sink).boxed(),
            SourceKind::Visa => check_visa(ctx, trip, sink).boxed(),
        })
        .collect();

    join_all(futures).await
}

/// Retrieval stage: fan out, join, then merge every result into `state`
pub async fn retrieve(
    ctx: &AppContext,
    state: &mut ConversationState,
    tasks: &[SourceKind],
    sink: &dyn ProgressSink,
) {
    let query = state.query.clone().unwrap_or_default();
    info!(tasks = ?tasks, "Dispatching retrieval");

    let results = run_tasks(ctx, tasks, &query, state.trip_context.as_ref(), sink).await;
    fan_in(state, results);

    debug!(sources = ?state.sources_used, "Retrieval merged");
}

/// Merge task results; the outcome does not depend on their order
pub fn fan_in(state: &mut ConversationState, results: Vec<RetrievalResult>) {
    for result in results {
        state.apply_retrieval(result);
    }
}

async fn search_knowledge(ctx: &AppContext, query: &str, sink: &dyn ProgressSink) -> RetrievalResult {
    sink.emit(Progress::thought(Phase::Knowledge, "Searching knowledge base..."));

    let settings = &ctx.workflow.settings;
    let hits = ctx
        .knowledge
        .search(query, settings.knowledge_top_k, settings.knowledge_score_threshold)
        .await;

    sink.emit(Progress::thought(
        Phase::Knowledge,
        format!("Found {} relevant documents", hits.len()),
    ));
    RetrievalResult::Knowledge(hits)
}

async fn search_web(ctx: &AppContext, query: &str, sink: &dyn ProgressSink) -> RetrievalResult {
    sink.emit(Progress::thought(Phase::Search, "Searching the web..."));

    let payload = ctx.web.search(query, ctx.workflow.settings.web_max_results).await;
    if let Some(payload) = &payload {
        sink.emit(Progress::thought(
            Phase::Search,
            format!("Found {} web results", payload.results.len()),
        ));
    }
    RetrievalResult::Web(payload)
}

async fn check_visa(ctx: &AppContext, trip: Option<&TripContext>, sink: &dyn ProgressSink) -> RetrievalResult {
    sink.emit(Progress::thought(Phase::Visa, "Checking visa requirements..."));

    let (nationality, destination) = match trip.map(|t| (t.nationality(), t.destination_country())) {
        Some((Some(nationality), Some(destination))) => (nationality, destination),
        _ => {
            let missing = trip.map(TripContext::missing_for_visa).unwrap_or_else(|| vec!["passport country", "destination"]);
            sink.emit(Progress::thought(Phase::Visa, format!("Need more info: {}", missing.join(", "))));
            metrics::record_connector("visa", "incomplete", 0.0);
            return RetrievalResult::Visa(VisaOutcome::incomplete(&missing));
        }
    };

    match ctx.visa.lookup(nationality, destination).await {
        Some(payload) => {
            sink.emit(Progress::thought(Phase::Visa, "Visa information retrieved"));
            RetrievalResult::Visa(VisaOutcome::Found { payload })
        }
        None => {
            sink.emit(Progress::thought(Phase::Visa, "Could not retrieve visa info for this route"));
            RetrievalResult::Visa(VisaOutcome::Unavailable)
        }
    }
}
