use crate::subscriber::Subscriber;

/// 订阅者快照：由外部协作方维护的内存缓存，同步读取
pub trait SubscriberSnapshot: Send + Sync {
    fn all_subscribers(&self) -> Vec<Subscriber>;
}
