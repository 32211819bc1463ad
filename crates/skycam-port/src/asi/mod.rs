//! ZWO ASI 相机 SDK 后端
//!
//! 通过 FFI 调用 `libASICamera2`。库的搜索路径由构建脚本按平台设置
//! （`ASI_SDK_DIR/lib/<platform>`）。

mod ffi;

use crate::{
    CameraInfo, CameraPort, ControlKind, ControlValue, ExposureStatus, ImageType, PortError,
    RoiFormat,
};
use ffi::*;
use libc::{c_int, c_long};
use std::ffi::CStr;
use std::time::Duration;
use tracing::{debug, info};

/// 把 SDK 错误码转换为端口错误
fn check(code: c_int) -> Result<(), PortError> {
    match code {
        ASI_SUCCESS => Ok(()),
        ASI_ERROR_CAMERA_CLOSED => Err(PortError::NotOpen),
        ASI_ERROR_CAMERA_REMOVED => Err(PortError::Removed),
        ASI_ERROR_TIMEOUT => Err(PortError::Timeout),
        ASI_ERROR_VIDEO_MODE_ACTIVE => Err(PortError::VideoModeActive),
        ASI_ERROR_EXPOSURE_IN_PROGRESS => Err(PortError::ExposureInProgress),
        other => Err(PortError::device(other, error_name(other))),
    }
}

/// 已连接的 ASI 相机数量
pub fn connected_cameras() -> usize {
    // SAFETY: 无参数的枚举调用
    let n = unsafe { ASIGetNumOfConnectedCameras() };
    n.max(0) as usize
}

/// ASI 相机
pub struct AsiCamera {
    index: c_int,
    id: c_int,
    property: AsiCameraInfo,
    is_open: bool,
}

impl AsiCamera {
    /// 按枚举序号选择相机（0 为第一台）
    ///
    /// # 错误
    /// - `PortError::NoCamera`: 序号超出已连接相机数量
    pub fn new(index: usize) -> Result<Self, PortError> {
        if index >= connected_cameras() {
            return Err(PortError::NoCamera);
        }
        let index = index as c_int;
        let mut property = AsiCameraInfo::zeroed();
        // SAFETY: property 为 repr(C) 结构体，生命周期覆盖整个调用
        check(unsafe { ASIGetCameraProperty(&mut property, index) })?;
        Ok(Self {
            index,
            id: property.camera_id,
            property,
            is_open: false,
        })
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    fn info(&self) -> CameraInfo {
        let p = &self.property;
        // SAFETY: SDK 保证 name 以 NUL 结尾
        let name = unsafe { CStr::from_ptr(p.name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let supported_bins = p
            .supported_bins
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as u32)
            .collect();
        let supported_formats = p
            .supported_video_format
            .iter()
            .take_while(|&&f| f != ASI_IMG_END)
            .filter_map(|&f| ImageType::from_raw(f))
            .collect();
        CameraInfo {
            name,
            id: p.camera_id,
            max_width: p.max_width.max(0) as u32,
            max_height: p.max_height.max(0) as u32,
            is_color: p.is_color_cam != ASI_FALSE,
            bit_depth: p.bit_depth.max(0) as u32,
            supported_bins,
            supported_formats,
            pixel_size_um: p.pixel_size,
        }
    }
}

impl CameraPort for AsiCamera {
    fn device_id(&self) -> i32 {
        self.id
    }

    fn open(&mut self) -> Result<CameraInfo, PortError> {
        // SAFETY: id 来自 ASIGetCameraProperty
        check(unsafe { ASIOpenCamera(self.id) })?;
        if let Err(e) = check(unsafe { ASIInitCamera(self.id) }) {
            unsafe { ASICloseCamera(self.id) };
            return Err(e);
        }
        self.is_open = true;
        let info = self.info();
        info!(
            "ASI camera opened: {} ({}x{}, color: {})",
            info.name, info.max_width, info.max_height, info.is_color
        );
        Ok(info)
    }

    fn close(&mut self) -> Result<(), PortError> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;
        check(unsafe { ASICloseCamera(self.id) })
    }

    fn set_control(&mut self, kind: ControlKind, value: i64, auto: bool) -> Result<(), PortError> {
        let auto = if auto { ASI_TRUE } else { ASI_FALSE };
        check(unsafe { ASISetControlValue(self.id, kind.as_raw(), value as c_long, auto) })
    }

    fn get_control(&mut self, kind: ControlKind) -> Result<ControlValue, PortError> {
        let mut value: c_long = 0;
        let mut auto: c_int = ASI_FALSE;
        check(unsafe { ASIGetControlValue(self.id, kind.as_raw(), &mut value, &mut auto) })?;
        Ok(ControlValue {
            value: value as i64,
            auto: auto != ASI_FALSE,
        })
    }

    fn set_frame_format(&mut self, format: RoiFormat) -> Result<(), PortError> {
        debug!("ASISetROIFormat {:?}", format);
        check(unsafe {
            ASISetROIFormat(
                self.id,
                format.width as c_int,
                format.height as c_int,
                format.bin as c_int,
                format.image_type.as_raw(),
            )
        })
    }

    fn start_video_capture(&mut self) -> Result<(), PortError> {
        check(unsafe { ASIStartVideoCapture(self.id) })
    }

    fn stop_video_capture(&mut self) -> Result<(), PortError> {
        check(unsafe { ASIStopVideoCapture(self.id) })
    }

    fn pull_video_frame(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<(), PortError> {
        let wait_ms = timeout.as_millis().min(c_int::MAX as u128) as c_int;
        // SAFETY: buffer 长度随指针一并传入
        check(unsafe {
            ASIGetVideoData(
                self.id,
                buffer.as_mut_ptr(),
                buffer.len() as c_long,
                wait_ms,
            )
        })
    }

    fn start_exposure(&mut self, dark_frame: bool) -> Result<(), PortError> {
        let dark = if dark_frame { ASI_TRUE } else { ASI_FALSE };
        check(unsafe { ASIStartExposure(self.id, dark) })
    }

    fn exposure_status(&mut self) -> Result<ExposureStatus, PortError> {
        let mut status: c_int = 0;
        check(unsafe { ASIGetExpStatus(self.id, &mut status) })?;
        ExposureStatus::from_raw(status)
            .ok_or_else(|| PortError::device(status, "unknown exposure status"))
    }

    fn stop_exposure(&mut self) -> Result<(), PortError> {
        check(unsafe { ASIStopExposure(self.id) })
    }

    fn fetch_exposure_result(&mut self, buffer: &mut [u8]) -> Result<(), PortError> {
        check(unsafe { ASIGetDataAfterExp(self.id, buffer.as_mut_ptr(), buffer.len() as c_long) })
    }
}

impl Drop for AsiCamera {
    fn drop(&mut self) {
        if self.is_open {
            unsafe { ASICloseCamera(self.id) };
        }
    }
}
