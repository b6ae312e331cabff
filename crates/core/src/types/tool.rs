//! Decoded tool records

use serde::{Deserialize, Serialize};
use std::fmt;

use super::PortHandle;

/// Handle status reported with each tool in a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolStatus {
    Valid,
    Missing,
    Disabled,
}

/// 6DOF pose: rotation quaternion, translation (mm), RMS error
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub q0: f32,
    pub qx: f32,
    pub qy: f32,
    pub qz: f32,
    pub tx: f32,
    pub ty: f32,
    pub tz: f32,
    pub error: f32,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            q0: 1.0,
            qx: 0.0,
            qy: 0.0,
            qz: 0.0,
            tx: 0.0,
            ty: 0.0,
            tz: 0.0,
            error: 0.0,
        }
    }

    #[must_use]
    pub fn translated(mut self, tx: f32, ty: f32, tz: f32) -> Self {
        self.tx = tx;
        self.ty = ty;
        self.tz = tz;
        self
    }
}

/// One tool's data from a decoded frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub port_handle: PortHandle,
    pub frame_number: u32,
    pub status: ToolStatus,
    /// Absent when the tool is missing or disabled
    pub transform: Option<Transform>,
}

impl ToolRecord {
    pub fn tracked(port_handle: PortHandle, frame_number: u32, transform: Transform) -> Self {
        Self {
            port_handle,
            frame_number,
            status: ToolStatus::Valid,
            transform: Some(transform),
        }
    }

    pub fn missing(port_handle: PortHandle, frame_number: u32) -> Self {
        Self {
            port_handle,
            frame_number,
            status: ToolStatus::Missing,
            transform: None,
        }
    }
}

impl fmt::Display for ToolRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] frame={} {:?}",
            self.port_handle, self.frame_number, self.status
        )?;
        if let Some(t) = &self.transform {
            write!(
                f,
                " q=({:.4},{:.4},{:.4},{:.4}) t=({:.2},{:.2},{:.2}) err={:.4}",
                t.q0, t.qx, t.qy, t.qz, t.tx, t.ty, t.tz, t.error
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_display_tracked() {
        let rec = ToolRecord::tracked(
            PortHandle::new("0A"),
            42,
            Transform::identity().translated(1.0, -2.5, 300.0),
        );
        assert_eq!(
            rec.to_string(),
            "[0A] frame=42 Valid q=(1.0000,0.0000,0.0000,0.0000) t=(1.00,-2.50,300.00) err=0.0000"
        );
    }

    #[test]
    fn test_tool_display_missing() {
        let rec = ToolRecord::missing(PortHandle::new("0B"), 7);
        assert_eq!(rec.to_string(), "[0B] frame=7 Missing");
    }
}
