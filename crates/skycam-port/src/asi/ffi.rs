//! `ASICamera2.h` 的 FFI 声明（仅包含用到的部分）

#![allow(non_snake_case)]

use libc::{c_char, c_double, c_float, c_int, c_long, c_uchar};

pub const ASI_FALSE: c_int = 0;
pub const ASI_TRUE: c_int = 1;

pub const ASI_IMG_END: c_int = -1;

pub const ASI_SUCCESS: c_int = 0;
pub const ASI_ERROR_INVALID_INDEX: c_int = 1;
pub const ASI_ERROR_INVALID_ID: c_int = 2;
pub const ASI_ERROR_INVALID_CONTROL_TYPE: c_int = 3;
pub const ASI_ERROR_CAMERA_CLOSED: c_int = 4;
pub const ASI_ERROR_CAMERA_REMOVED: c_int = 5;
pub const ASI_ERROR_INVALID_SIZE: c_int = 8;
pub const ASI_ERROR_INVALID_IMGTYPE: c_int = 9;
pub const ASI_ERROR_OUTOF_BOUNDARY: c_int = 10;
pub const ASI_ERROR_TIMEOUT: c_int = 11;
pub const ASI_ERROR_INVALID_SEQUENCE: c_int = 12;
pub const ASI_ERROR_BUFFER_TOO_SMALL: c_int = 13;
pub const ASI_ERROR_VIDEO_MODE_ACTIVE: c_int = 14;
pub const ASI_ERROR_EXPOSURE_IN_PROGRESS: c_int = 15;
pub const ASI_ERROR_GENERAL_ERROR: c_int = 16;
pub const ASI_ERROR_INVALID_MODE: c_int = 17;

pub fn error_name(code: c_int) -> &'static str {
    match code {
        ASI_ERROR_INVALID_INDEX => "invalid index",
        ASI_ERROR_INVALID_ID => "invalid id",
        ASI_ERROR_INVALID_CONTROL_TYPE => "invalid control type",
        ASI_ERROR_INVALID_SIZE => "invalid size",
        ASI_ERROR_INVALID_IMGTYPE => "invalid image type",
        ASI_ERROR_OUTOF_BOUNDARY => "out of boundary",
        ASI_ERROR_INVALID_SEQUENCE => "invalid sequence",
        ASI_ERROR_BUFFER_TOO_SMALL => "buffer too small",
        ASI_ERROR_GENERAL_ERROR => "general error",
        ASI_ERROR_INVALID_MODE => "invalid mode",
        _ => "unknown error",
    }
}

/// ASI_CAMERA_INFO
#[repr(C)]
pub struct AsiCameraInfo {
    pub name: [c_char; 64],
    pub camera_id: c_int,
    pub max_height: c_long,
    pub max_width: c_long,
    pub is_color_cam: c_int,
    pub bayer_pattern: c_int,
    pub supported_bins: [c_int; 16],
    pub supported_video_format: [c_int; 8],
    pub pixel_size: c_double,
    pub mechanical_shutter: c_int,
    pub st4_port: c_int,
    pub is_cooler_cam: c_int,
    pub is_usb3_host: c_int,
    pub is_usb3_camera: c_int,
    pub elec_per_adu: c_float,
    pub bit_depth: c_int,
    pub is_trigger_cam: c_int,
    pub unused: [c_char; 16],
}

impl AsiCameraInfo {
    pub fn zeroed() -> Self {
        // SAFETY: 全部字段均为整数/浮点/数组，全零是合法值
        unsafe { std::mem::zeroed() }
    }
}

unsafe extern "C" {
    pub fn ASIGetNumOfConnectedCameras() -> c_int;
    pub fn ASIGetCameraProperty(info: *mut AsiCameraInfo, index: c_int) -> c_int;
    pub fn ASIOpenCamera(id: c_int) -> c_int;
    pub fn ASIInitCamera(id: c_int) -> c_int;
    pub fn ASICloseCamera(id: c_int) -> c_int;
    pub fn ASISetControlValue(id: c_int, control: c_int, value: c_long, auto: c_int) -> c_int;
    pub fn ASIGetControlValue(
        id: c_int,
        control: c_int,
        value: *mut c_long,
        auto: *mut c_int,
    ) -> c_int;
    pub fn ASISetROIFormat(id: c_int, width: c_int, height: c_int, bin: c_int, img_type: c_int)
    -> c_int;
    pub fn ASIStartVideoCapture(id: c_int) -> c_int;
    pub fn ASIStopVideoCapture(id: c_int) -> c_int;
    pub fn ASIGetVideoData(id: c_int, buffer: *mut c_uchar, size: c_long, wait_ms: c_int) -> c_int;
    pub fn ASIStartExposure(id: c_int, is_dark: c_int) -> c_int;
    pub fn ASIStopExposure(id: c_int) -> c_int;
    pub fn ASIGetExpStatus(id: c_int, status: *mut c_int) -> c_int;
    pub fn ASIGetDataAfterExp(id: c_int, buffer: *mut c_uchar, size: c_long) -> c_int;
}
