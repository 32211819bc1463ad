//! 设备会话
//!
//! 同一进程内，一台物理设备同时最多只能有一个打开的会话。
//! [`DeviceSession`] 在创建时登记设备 ID，Drop 时注销。

use crate::PortError;
use parking_lot::Mutex;
use std::collections::BTreeSet;

static OPEN_DEVICES: Mutex<BTreeSet<i32>> = Mutex::new(BTreeSet::new());

/// 已打开设备的会话凭证（RAII）
#[derive(Debug)]
pub struct DeviceSession {
    id: i32,
}

impl DeviceSession {
    /// 登记设备 ID
    ///
    /// # 错误
    /// - `PortError::AlreadyOpen`: 该设备已有活动会话
    pub fn acquire(id: i32) -> Result<Self, PortError> {
        let mut open = OPEN_DEVICES.lock();
        if !open.insert(id) {
            return Err(PortError::AlreadyOpen(id));
        }
        Ok(Self { id })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// 设备当前是否有活动会话
    pub fn is_open(id: i32) -> bool {
        OPEN_DEVICES.lock().contains(&id)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        OPEN_DEVICES.lock().remove(&self.id);
    }
}
