//! 分块上传

mod resumable_uploader;
mod upload_response;

pub use resumable_uploader::{ResumableUploader, UploadState};
pub use upload_response::UploadResponse;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// 取消上传的句柄
///
/// 克隆出的句柄共享同一个状态，任意一个调用 [`CancellationHandle::cancel`] 后，
/// 上传器会在下一块开始之前或创建文件之前停止，已取消的上传不会创建文件
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
