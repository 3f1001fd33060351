pub(crate) use tokio::time::{Sleep, sleep};
