use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::observer::Observer;
use crate::pipeline::Pipeline;
use crate::store::HistoryStore;
use crate::viewer::MediaViewer;

pub struct AppState {
    pub limiter: Arc<Semaphore>,
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<Pipeline>,
    pub store: Arc<HistoryStore>,
    pub viewer: Arc<dyn MediaViewer>,
    pub observer: Arc<dyn Observer>,
}
