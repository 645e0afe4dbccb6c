use std::sync::Arc;

use audiobot_config::{MessageQueueConfig, PublisherConfig};
use audiobot_domain::{MessageBroker, Topology};
use audiobot_testing_utils::{
    fast_retry_policy, test_tuning, MockLibraryStore, MockMemoryProbe, MockTaskStatusStore,
};

use crate::context::TaskContext;
use crate::publisher::TaskPublisher;

pub(crate) fn context_with(
    store: &MockTaskStatusStore,
    library: &MockLibraryStore,
    broker: Arc<dyn MessageBroker>,
) -> TaskContext {
    let store = Arc::new(store.clone());
    let publisher = TaskPublisher::new(
        broker,
        store.clone(),
        Arc::new(MockMemoryProbe(None)),
        Arc::new(Topology::from_config(&MessageQueueConfig::default())),
        fast_retry_policy(0),
        PublisherConfig::default(),
    );
    TaskContext::new(
        store,
        Arc::new(library.clone()),
        Arc::new(publisher),
        test_tuning(),
    )
}
