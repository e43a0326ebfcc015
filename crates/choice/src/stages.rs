use std::future::Future;

use kinspect_core::Choice;
use tracing::debug;

use crate::manager::RoundOutcome;
use crate::ChoiceResult;

/// Run two dependent selection rounds and then `action`.
///
/// The second round is built from the first round's picks. Returns `None`
/// when either round is cancelled, abandoned, or left without a pick.
pub async fn choose_two_stage<F1, F2, Fut2, A, R>(first: F1, second: F2, action: A) -> ChoiceResult<Option<R>>
where
    F1: Future<Output = ChoiceResult<RoundOutcome>>,
    F2: FnOnce(Vec<Choice>) -> Fut2,
    Fut2: Future<Output = ChoiceResult<RoundOutcome>>,
    A: FnOnce(Vec<Choice>, Vec<Choice>) -> R,
{
    let Some(first_picks) = first.await?.resolved().await else {
        debug!("choice: two-stage stopped after stage one");
        return Ok(None);
    };
    let Some(second_picks) = second(first_picks.clone()).await?.resolved().await else {
        debug!("choice: two-stage stopped after stage two");
        return Ok(None);
    };
    Ok(Some(action(first_picks, second_picks)))
}
