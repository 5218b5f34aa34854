//! Live capsule list over Server-Sent Events
//!
//! Every snapshot of the live query is sent as a `capsules` event holding the full classified
//! list, read failures as a `failure` event. The stream ends when the client goes away, the user
//! signs out or the server shuts down.

use std::sync::Arc;

use axum::Extension;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::response::sse::Sse;
use futures::Stream;
use futures::stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capsule_store::CapsuleStore;
use crate::capsule_store::StoreError;
use crate::identity::AuthState;
use crate::identity::Identity;
use crate::lock_state::CapsuleView;
use crate::session::Session;
use crate::session::SystemClock;
use crate::storage::Storage;
use crate::sync::LiveListSynchronizer;
use crate::sync::RenderBoundary;

use super::CurrentUser;
use super::Error;

/// Something to tell the client
#[derive(Debug)]
enum Frame {
    /// A freshly classified list
    Capsules(Vec<CapsuleView>),

    /// The list could not be read
    Failure(String),
}

impl Frame {
    /// Turn the frame into an SSE event
    fn into_event(self) -> Result<Event, axum::Error> {
        match self {
            Frame::Capsules(entries) => Event::default().event("capsules").json_data(entries),
            Frame::Failure(message) => Ok(Event::default().event("failure").data(message)),
        }
    }
}

/// Render boundary that forwards everything into the event stream
struct ChannelRender {
    /// Towards the response body
    sender: mpsc::UnboundedSender<Frame>,
}

impl RenderBoundary for ChannelRender {
    fn render_list(&self, entries: Vec<CapsuleView>) {
        // the client is gone, the driver stops the list soon
        let _ = self.sender.send(Frame::Capsules(entries));
    }

    fn render_list_failure(&self, error: &StoreError) {
        let _ = self.sender.send(Frame::Failure(error.to_string()));
    }
}

/// Stream the capsules of the current user
///
/// The auth state is followed before the session is checked once more, so a sign out right
/// after the token was accepted still ends the stream
///
/// Request:
/// ```sh
/// curl -v -N -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/capsules/live
/// ```
///
/// Response:
/// ```text
/// event: capsules
/// data: [{"id":"<uuid>","state":"locked","title":"Birthday",...}]
/// ```
pub async fn live<S: Storage>(
    Extension(store): Extension<CapsuleStore<S>>,
    Extension(identity): Extension<Identity<S>>,
    Extension(shutdown): Extension<CancellationToken>,
    current_user: CurrentUser<S>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, Error> {
    let auth_state = identity.on_auth_state_change(&current_user);

    if !identity.is_signed_in(&current_user).await? {
        return Err(Error::unauthorized("Token expired"));
    }

    let (sender, receiver) = mpsc::unbounded_channel();

    let render = Arc::new(ChannelRender { sender });
    let synchronizer = LiveListSynchronizer::new(store, Arc::clone(&render), SystemClock);

    tokio::spawn(drive(
        synchronizer,
        render,
        auth_state,
        current_user.session(),
        shutdown,
    ));

    let events = stream::unfold(receiver, |mut receiver| async move {
        let frame = receiver.recv().await?;

        Some((frame.into_event(), receiver))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Keep the live list in step with the auth state of the user
///
/// Ends, and with it the event stream, on sign out, shutdown or when the client went away
async fn drive<S: Storage>(
    synchronizer: LiveListSynchronizer<S, ChannelRender>,
    render: Arc<ChannelRender>,
    mut auth_state: AuthState,
    session: Session,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::debug!(user_id = %session.user_id, "Live list ends on shutdown");
                break;
            }
            () = render.sender.closed() => {
                tracing::debug!(user_id = %session.user_id, "Live list client went away");
                break;
            }
            change = auth_state.changed() => match change {
                Some(Some(_)) => synchronizer.on_auth_state_change(Some(&session)),
                Some(None) | None => {
                    synchronizer.on_auth_state_change(None);
                    break;
                }
            },
        }
    }

    synchronizer.stop();
}
