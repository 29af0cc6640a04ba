use server_api::ApiContext;
use shared::protocol::IssueEvent;
use tokio::sync::broadcast;
use url::Url;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) events: broadcast::Sender<IssueEvent>,
    pub(crate) public_url: Url,
    pub(crate) max_photo_bytes: usize,
}
