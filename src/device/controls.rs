//! Control dependency resolution and normalization.
//!
//! Some controls are gated by another control's value (manual exposure time
//! is meaningless while auto exposure is active). The table here is fixed but
//! extendable; consumers call [`is_disabled`] to decide whether a control is
//! currently editable.

use super::{Control, ControlType, Device};

/// Auto Exposure value meaning "manual mode" (V4L2 convention).
const AUTO_EXPOSURE_MANUAL: f64 = 1.0;

enum GateRule {
    /// Dependent is disabled unless the gate holds exactly this value.
    UnlessEquals(f64),
    /// Dependent is disabled while the gate value is truthy (non-zero).
    WhenTruthy,
}

struct Gate {
    dependent: &'static str,
    gate: &'static str,
    rule: GateRule,
}

const GATES: &[Gate] = &[
    Gate {
        dependent: "Exposure Time, Absolute",
        gate: "Auto Exposure",
        rule: GateRule::UnlessEquals(AUTO_EXPOSURE_MANUAL),
    },
    Gate {
        dependent: "White Balance Temperature",
        gate: "White Balance, Auto",
        rule: GateRule::WhenTruthy,
    },
    Gate {
        dependent: "Bitrate",
        gate: "Variable Bitrate",
        rule: GateRule::WhenTruthy,
    },
];

/// Whether `control` is currently disabled because another control on the
/// same device gates it. Controls without a gate entry, and gates that are
/// not present on the device, never disable anything.
pub fn is_disabled(control: &Control, device: &Device) -> bool {
    for entry in GATES {
        if control.name != entry.dependent {
            continue;
        }
        let Some(gate) = device.control_by_name(entry.gate) else {
            continue;
        };
        return match entry.rule {
            GateRule::UnlessEquals(v) => gate.value != v,
            GateRule::WhenTruthy => gate.value != 0.0,
        };
    }
    false
}

/// Normalize a device's control list before it enters the registry.
///
/// An "Auto Exposure" control reported as MENU is semantically binary and is
/// coerced to BOOLEAN. Control types outside INTEGER/BOOLEAN/MENU are never
/// dispatched; they are dropped here with a warning.
pub fn normalize_controls(device: &mut Device) {
    for control in &mut device.controls {
        if control.name.contains("Auto Exposure")
            && control.flags.control_type == ControlType::Menu
        {
            control.flags.control_type = ControlType::Boolean;
        }
    }

    device.controls.retain(|control| {
        let keep = control.flags.control_type.is_dispatchable();
        if !keep {
            log::warn!(
                "{}: dropping unsupported control type {:?} ({})",
                device.bus_info,
                control.flags.control_type,
                control.name
            );
        }
        keep
    });
}
