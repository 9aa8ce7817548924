use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flags raised by the global hotkeys. The UI loop swaps them back to
/// false when it consumes a press.
#[derive(Debug, Default)]
pub struct HotkeyFlags {
    /// F11
    pub start_pause: AtomicBool,
    /// F12
    pub stop: AtomicBool,
}

impl HotkeyFlags {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Consume a pending start/pause press.
    pub fn take_start_pause(&self) -> bool {
        self.start_pause.swap(false, Ordering::AcqRel)
    }

    /// Consume a pending stop press.
    pub fn take_stop(&self) -> bool {
        self.stop.swap(false, Ordering::AcqRel)
    }
}

/// Listen for F11 (start/pause) and F12 (stop) on a background thread.
#[cfg(target_os = "macos")]
pub fn start_hotkey_listener(flags: Arc<HotkeyFlags>) {
    use std::ffi::c_void;

    type CGEventTapProxy = *mut c_void;
    type CGEventRef = *mut c_void;
    type CFMachPortRef = *mut c_void;
    type CFRunLoopSourceRef = *mut c_void;
    type CFRunLoopRef = *mut c_void;
    type CFStringRef = *const c_void;
    type CGEventMask = u64;
    type CGEventType = u32;

    type CGEventTapCallBack = unsafe extern "C" fn(
        CGEventTapProxy,
        CGEventType,
        CGEventRef,
        *mut c_void,
    ) -> CGEventRef;

    const K_CG_HID_EVENT_TAP: u32 = 0;
    const K_CG_HEAD_INSERT_EVENT_TAP: u32 = 0;
    const K_CG_EVENT_TAP_OPTION_LISTEN_ONLY: u32 = 1;
    const CG_EVENT_KEY_DOWN: u32 = 10;
    const K_CG_KEYBOARD_EVENT_KEYCODE: u32 = 9;
    const K_CG_KEYBOARD_EVENT_AUTOREPEAT: u32 = 8;

    const KEYCODE_F11: i64 = 103;
    const KEYCODE_F12: i64 = 111;

    #[link(name = "ApplicationServices", kind = "framework")]
    extern "C" {
        fn CGEventTapCreate(
            tap: u32,
            place: u32,
            options: u32,
            events_of_interest: CGEventMask,
            callback: CGEventTapCallBack,
            user_info: *mut c_void,
        ) -> CFMachPortRef;
        fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
        fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
    }

    #[link(name = "CoreFoundation", kind = "framework")]
    extern "C" {
        fn CFMachPortCreateRunLoopSource(
            allocator: *const c_void,
            port: CFMachPortRef,
            order: i64,
        ) -> CFRunLoopSourceRef;
        fn CFRunLoopGetCurrent() -> CFRunLoopRef;
        fn CFRunLoopAddSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);
        fn CFRunLoopRun();

        static kCFRunLoopCommonModes: CFStringRef;
    }

    unsafe extern "C" fn hotkey_callback(
        _proxy: CGEventTapProxy,
        event_type: CGEventType,
        event: CGEventRef,
        user_info: *mut c_void,
    ) -> CGEventRef {
        unsafe {
            if event_type != CG_EVENT_KEY_DOWN {
                return event;
            }
            if CGEventGetIntegerValueField(event, K_CG_KEYBOARD_EVENT_AUTOREPEAT) != 0 {
                return event;
            }

            let flags = &*(user_info as *const HotkeyFlags);
            match CGEventGetIntegerValueField(event, K_CG_KEYBOARD_EVENT_KEYCODE) {
                KEYCODE_F11 => flags.start_pause.store(true, Ordering::Release),
                KEYCODE_F12 => flags.stop.store(true, Ordering::Release),
                _ => {}
            }
            event
        }
    }

    std::thread::spawn(move || unsafe {
        let mask: CGEventMask = 1 << CG_EVENT_KEY_DOWN;
        let flags_ptr = Arc::into_raw(flags) as *mut c_void;

        let tap = CGEventTapCreate(
            K_CG_HID_EVENT_TAP,
            K_CG_HEAD_INSERT_EVENT_TAP,
            K_CG_EVENT_TAP_OPTION_LISTEN_ONLY,
            mask,
            hotkey_callback,
            flags_ptr,
        );

        if tap.is_null() {
            crate::logger::error(
                "failed to create event tap for F11/F12, \
                 grant Accessibility permission to your terminal",
            );
            let _ = Arc::from_raw(flags_ptr as *const HotkeyFlags);
            return;
        }

        let source = CFMachPortCreateRunLoopSource(std::ptr::null(), tap, 0);
        let run_loop = CFRunLoopGetCurrent();
        CFRunLoopAddSource(run_loop, source, kCFRunLoopCommonModes);
        CGEventTapEnable(tap, true);
        crate::logger::info("global hotkeys F11 (start/pause) and F12 (stop) active");

        CFRunLoopRun();
    });
}

/// Listen for F11 (start/pause) and F12 (stop) on a background thread.
#[cfg(target_os = "windows")]
pub fn start_hotkey_listener(flags: Arc<HotkeyFlags>) {
    use std::ffi::c_void;

    type HWND = *mut c_void;
    type BOOL = i32;
    type UINT = u32;
    type WPARAM = usize;
    type LPARAM = isize;
    type DWORD = u32;
    type LONG = i32;

    #[repr(C)]
    struct POINT {
        x: LONG,
        y: LONG,
    }

    #[repr(C)]
    struct MSG {
        hwnd: HWND,
        message: UINT,
        w_param: WPARAM,
        l_param: LPARAM,
        time: DWORD,
        pt: POINT,
    }

    const MOD_NOREPEAT: u32 = 0x4000;
    const VK_F11: u32 = 0x7A;
    const VK_F12: u32 = 0x7B;
    const WM_HOTKEY: u32 = 0x0312;
    const ID_START_PAUSE: i32 = 1;
    const ID_STOP: i32 = 2;

    #[link(name = "user32")]
    extern "system" {
        fn RegisterHotKey(hwnd: HWND, id: i32, fs_modifiers: UINT, vk: UINT) -> BOOL;
        fn GetMessageW(msg: *mut MSG, hwnd: HWND, msg_filter_min: UINT, msg_filter_max: UINT) -> BOOL;
    }

    std::thread::spawn(move || unsafe {
        for (id, vk, name) in [(ID_START_PAUSE, VK_F11, "F11"), (ID_STOP, VK_F12, "F12")] {
            if RegisterHotKey(std::ptr::null_mut(), id, MOD_NOREPEAT, vk) == 0 {
                crate::logger::error(&format!(
                    "failed to register global hotkey {}, another application may have claimed it",
                    name
                ));
            }
        }
        crate::logger::info("global hotkeys F11 (start/pause) and F12 (stop) registered");

        let mut msg: MSG = std::mem::zeroed();
        // GetMessageW blocks until a message arrives; returns 0 on WM_QUIT
        while GetMessageW(&mut msg, std::ptr::null_mut(), 0, 0) > 0 {
            if msg.message != WM_HOTKEY {
                continue;
            }
            match msg.w_param as i32 {
                ID_START_PAUSE => flags.start_pause.store(true, Ordering::Release),
                ID_STOP => flags.stop.store(true, Ordering::Release),
                _ => {}
            }
        }
    });
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn start_hotkey_listener(_flags: Arc<HotkeyFlags>) {
    crate::logger::info("global hotkeys not supported here, use the s/x keys");
}
