//! Live capsule list
//!
//! Keeps a rendered list of a user's capsules in step with the storage. A single live query is
//! held per session; every snapshot it delivers is classified in full against one sampled "now"
//! and replaces whatever was rendered before.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::capsule_store::CapsuleStore;
use crate::capsule_store::StoreError;
use crate::capsules::Capsule;
use crate::lock_state::CapsuleView;
use crate::lock_state::reveal;
use crate::session::Clock;
use crate::session::Session;
use crate::session::SystemClock;
use crate::storage::Storage;
use crate::storage::Subscription;
use crate::storage::Unsubscribe;

/// Where classified lists end up
pub trait RenderBoundary: Send + Sync + 'static {
    /// Replace the rendered list
    fn render_list(&self, entries: Vec<CapsuleView>);

    /// The list could not be read
    fn render_list_failure(&self, error: &StoreError);
}

/// Turn a snapshot into what gets rendered
///
/// Capsules of other owners are dropped, whatever the storage query promised. The rest is ordered
/// by creation date (then ID) and classified against the same `now`.
pub fn reconcile(owner_id: &Uuid, mut items: Vec<Capsule>, now: DateTime<Utc>) -> Vec<CapsuleView> {
    let delivered = items.len();

    items.retain(|capsule| capsule.is_owned_by(owner_id));

    if items.len() != delivered {
        tracing::warn!(
            %owner_id,
            dropped = delivered - items.len(),
            "Live query delivered capsules of other owners"
        );
    }

    items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    items.iter().map(|capsule| reveal(capsule, now)).collect()
}

/// Synchronizer state
#[derive(Debug)]
enum State {
    /// No live query
    Idle,

    /// Live query running for a session
    Subscribed {
        /// The session the query belongs to
        session: Session,

        /// Stops the query
        unsubscribe: Unsubscribe,
    },
}

/// Live list of the capsules of the signed in user
pub struct LiveListSynchronizer<S, R, C = SystemClock>
where
    S: Storage,
    R: RenderBoundary,
    C: Clock,
{
    /// Capsule store to query
    store: CapsuleStore<S>,

    /// Receives every rendered list
    render: Arc<R>,

    /// Samples "now" once per snapshot
    clock: Arc<C>,

    /// Idle or subscribed
    state: Mutex<State>,

    /// Held while a list is rendered and while a live query is torn down
    rendering: Arc<Mutex<()>>,
}

impl<S, R, C> LiveListSynchronizer<S, R, C>
where
    S: Storage,
    R: RenderBoundary,
    C: Clock,
{
    /// Create an idle synchronizer
    pub fn new(store: CapsuleStore<S>, render: Arc<R>, clock: C) -> Self {
        Self {
            store,
            render,
            clock: Arc::new(clock),
            state: Mutex::new(State::Idle),
            rendering: Arc::new(Mutex::new(())),
        }
    }

    /// Follow auth state: a session starts the live list, no session stops it
    pub fn on_auth_state_change(&self, session: Option<&Session>) {
        match session {
            Some(session) => self.start(session),
            None => self.stop(),
        }
    }

    /// Start the live list for a session
    ///
    /// A running live list (of any session) is stopped first
    pub fn start(&self, session: &Session) {
        let mut state = self.lock_state();

        teardown(&mut state, &self.rendering);

        let subscription = self.store.subscribe_by_owner(session.user_id);
        let unsubscribe = subscription.handle();

        tokio::spawn(consume(
            subscription,
            session.user_id,
            Arc::clone(&self.render),
            Arc::clone(&self.clock),
            Arc::clone(&self.rendering),
        ));

        tracing::info!(user_id = %session.user_id, "Live capsule list started");

        *state = State::Subscribed {
            session: session.clone(),
            unsubscribe,
        };
    }

    /// Stop the live list, if any
    pub fn stop(&self) {
        teardown(&mut self.lock_state(), &self.rendering);
    }

    /// The session of the running live list
    #[cfg(test)]
    pub fn session(&self) -> Option<Session> {
        match &*self.lock_state() {
            State::Idle => None,
            State::Subscribed { session, .. } => Some(session.clone()),
        }
    }

    /// Lock the state, a panic elsewhere does not make it unusable
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S, R, C> Drop for LiveListSynchronizer<S, R, C>
where
    S: Storage,
    R: RenderBoundary,
    C: Clock,
{
    fn drop(&mut self) {
        teardown(
            self.state.get_mut().unwrap_or_else(PoisonError::into_inner),
            &self.rendering,
        );
    }
}

/// Release the live query and go idle
///
/// Waits for a render in progress, nothing is rendered for the query once this returns
fn teardown(state: &mut State, rendering: &Mutex<()>) {
    if let State::Subscribed {
        session,
        unsubscribe,
    } = std::mem::replace(state, State::Idle)
    {
        let _rendering = rendering.lock().unwrap_or_else(PoisonError::into_inner);

        unsubscribe.unsubscribe();

        tracing::info!(user_id = %session.user_id, "Live capsule list stopped");
    }
}

/// Render every snapshot of a live query, one at a time
async fn consume<R, C>(
    mut subscription: Subscription,
    owner_id: Uuid,
    render: Arc<R>,
    clock: Arc<C>,
    rendering: Arc<Mutex<()>>,
) where
    R: RenderBoundary,
    C: Clock,
{
    let handle = subscription.handle();

    while let Some(snapshot) = subscription.next().await {
        let snapshot = snapshot.map(|items| reconcile(&owner_id, items, clock.now()));

        if !render_snapshot(snapshot, &owner_id, &*render, &handle, &rendering) {
            break;
        }
    }
}

/// Render a classified snapshot, unless the live query was released in the meantime
///
/// Returns `false` when the query is released
fn render_snapshot<R: RenderBoundary>(
    snapshot: Result<Vec<CapsuleView>, crate::storage::Error>,
    owner_id: &Uuid,
    render: &R,
    handle: &Unsubscribe,
    rendering: &Mutex<()>,
) -> bool {
    let _rendering = rendering.lock().unwrap_or_else(PoisonError::into_inner);

    // stopped while the snapshot was on its way
    if handle.is_released() {
        return false;
    }

    match snapshot {
        Ok(entries) => render.render_list(entries),
        Err(err) => {
            tracing::error!(%owner_id, "Could not read capsules: {err}");
            render.render_list_failure(&StoreError::from(err));
        }
    }

    true
}
