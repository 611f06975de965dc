//! Optional frame-capture tool integration.
//!
//! The capture DLL is probed by name at startup; absence is silent. The API
//! struct is a table of C function pointers returned through
//! `RENDERDOC_GetAPI`; only the entry points the backend calls are typed,
//! the rest are kept as opaque slots to preserve the table layout.

use std::ffi::c_void;

use windows::core::PCSTR;
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryA};

type GetApiFn = extern "C" fn(version: i32, out_pointers: *mut *mut c_void) -> i32;
type MaskOverlayBitsFn = extern "C" fn(and: u32, or: u32);
type LaunchReplayUiFn = extern "C" fn(connect: u32, cmdline: *const i8) -> u32;
type FrameCaptureFn = extern "C" fn(device: *mut c_void, window: *mut c_void);
type EndFrameCaptureFn = extern "C" fn(device: *mut c_void, window: *mut c_void) -> u32;

const API_VERSION_1_0_2: i32 = 10002;
const OVERLAY_ENABLED_BIT: u32 = 0x1;

/// Function table of capture API 1.0.2; field order is the ABI.
#[repr(C)]
struct CaptureApi {
    get_api_version: *const c_void,
    set_capture_option_u32: *const c_void,
    set_capture_option_f32: *const c_void,
    get_capture_option_u32: *const c_void,
    get_capture_option_f32: *const c_void,
    set_focus_toggle_keys: *const c_void,
    set_capture_keys: *const c_void,
    get_overlay_bits: *const c_void,
    mask_overlay_bits: MaskOverlayBitsFn,
    shutdown: *const c_void,
    unload_crash_handler: *const c_void,
    set_log_file_path_template: *const c_void,
    get_log_file_path_template: *const c_void,
    get_num_captures: *const c_void,
    get_capture: *const c_void,
    trigger_capture: *const c_void,
    is_target_control_connected: *const c_void,
    launch_replay_ui: LaunchReplayUiFn,
    set_active_window: *const c_void,
    start_frame_capture: FrameCaptureFn,
    is_frame_capturing: *const c_void,
    end_frame_capture: EndFrameCaptureFn,
}

pub(crate) struct CaptureTool {
    api: *const CaptureApi,
}

impl CaptureTool {
    /// Probe the capture DLL; `None` when it is not present.
    pub fn load() -> Option<Self> {
        unsafe {
            let module = LoadLibraryA(PCSTR(b"renderdoc.dll\0".as_ptr()))
                .or_else(|_| {
                    LoadLibraryA(PCSTR(
                        b"C:\\Program Files\\RenderDoc\\renderdoc.dll\0".as_ptr(),
                    ))
                })
                .ok()?;
            let get_api = GetProcAddress(module, PCSTR(b"RENDERDOC_GetAPI\0".as_ptr()))?;
            let get_api: GetApiFn = std::mem::transmute(get_api);

            let mut api: *mut c_void = std::ptr::null_mut();
            if get_api(API_VERSION_1_0_2, &mut api) != 1 || api.is_null() {
                return None;
            }
            let tool = Self {
                api: api as *const CaptureApi,
            };
            ((*tool.api).mask_overlay_bits)(!OVERLAY_ENABLED_BIT, 0);
            Some(tool)
        }
    }

    pub fn start_capture(&self) {
        unsafe {
            ((*self.api).start_frame_capture)(std::ptr::null_mut(), std::ptr::null_mut());
        }
    }

    pub fn stop_capture(&self) {
        unsafe {
            ((*self.api).end_frame_capture)(std::ptr::null_mut(), std::ptr::null_mut());
        }
    }

    pub fn launch_replay_ui(&self) {
        unsafe {
            ((*self.api).launch_replay_ui)(1, std::ptr::null());
        }
    }
}

type BeginEventOnCommandList =
    extern "stdcall" fn(*const c_void, u64, windows::core::PSTR) -> i32;
type EndEventOnCommandList = extern "stdcall" fn(*const c_void) -> i32;

/// PIX event runtime, probed the same way; drives the debug-group markers.
#[derive(Clone, Copy)]
pub(crate) struct PixRuntime {
    begin_event: BeginEventOnCommandList,
    end_event: EndEventOnCommandList,
}

impl PixRuntime {
    pub fn load() -> Option<Self> {
        unsafe {
            let module = LoadLibraryA(PCSTR(b"WinPixEventRuntime.dll\0".as_ptr())).ok()?;
            let begin = GetProcAddress(module, PCSTR(b"PIXBeginEventOnCommandList\0".as_ptr()))?;
            let end = GetProcAddress(module, PCSTR(b"PIXEndEventOnCommandList\0".as_ptr()))?;
            Some(Self {
                begin_event: std::mem::transmute::<_, BeginEventOnCommandList>(begin),
                end_event: std::mem::transmute::<_, EndEventOnCommandList>(end),
            })
        }
    }

    pub fn begin_event(
        &self,
        cmd_list: &windows::Win32::Graphics::Direct3D12::ID3D12GraphicsCommandList,
        color: u64,
        name: &str,
    ) {
        let name = std::ffi::CString::new(name).unwrap_or_default();
        unsafe {
            let ptr = std::mem::transmute_copy::<_, *const c_void>(cmd_list);
            (self.begin_event)(ptr, color, windows::core::PSTR(name.as_ptr() as _));
        }
    }

    pub fn end_event(
        &self,
        cmd_list: &windows::Win32::Graphics::Direct3D12::ID3D12GraphicsCommandList,
    ) {
        unsafe {
            let ptr = std::mem::transmute_copy::<_, *const c_void>(cmd_list);
            (self.end_event)(ptr);
        }
    }
}
