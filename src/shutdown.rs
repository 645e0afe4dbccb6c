use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// 优雅关闭管理器
///
/// 所有消费者订阅同一个广播通道；重复触发只发送一次信号。
#[derive(Clone)]
pub struct ShutdownManager {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 广播通道的发送端，消费者各自订阅
    pub fn sender(&self) -> broadcast::Sender<()> {
        self.sender.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        let receivers = self.sender.receiver_count();
        // 没有订阅者时发送失败，忽略
        let _ = self.sender.send(());
        info!("关闭信号已发送给 {} 个订阅者", receivers);
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到Ctrl+C信号"),
        _ = terminate => info!("收到SIGTERM信号"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_subscribers_receive_signal() {
        let manager = ShutdownManager::new();
        let mut first = manager.subscribe();
        let mut second = manager.sender().subscribe();

        assert!(!manager.is_shutdown());
        manager.shutdown();
        assert!(manager.is_shutdown());

        first.recv().await.unwrap();
        second.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_sent_once() {
        let manager = ShutdownManager::new();
        let clone = manager.clone();
        let mut receiver = manager.subscribe();

        manager.shutdown();
        clone.shutdown();

        receiver.recv().await.unwrap();
        assert!(matches!(
            receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert!(clone.is_shutdown());
    }

    #[test]
    fn test_shutdown_without_subscribers_is_harmless() {
        let manager = ShutdownManager::default();
        manager.shutdown();
        assert!(manager.is_shutdown());
    }
}
