//! Decoder for the general binary format carried by newer tracking replies.
//!
//! The payload is a container: a format version, a component count, then
//! that many self-sized components back to back.
//!
//! ```text
//! container:  version u16, component count u16, components...
//! component:  +----------+----------+-------------+------------+---------+
//!             | type u16 | size u32 | option u16  | items u32  | payload |
//!             +----------+----------+-------------+------------+---------+
//!             size counts the 12-byte header plus the payload
//! ```
//!
//! The size field is what makes the format forward compatible: a reader
//! advances exactly `size` bytes per component whether or not it understands
//! the type, so unknown components pass through harmlessly. This decoder
//! enforces that by slicing each component's payload out of the container
//! before looking inside it.
//!
//! A frame component nests further: each of its items is frame metadata
//! followed by a complete inner container holding that frame's data
//! components.

use tracing::debug;

use crate::domain::alert::SystemAlert;
use crate::domain::marker::MarkerData;
use crate::domain::tool::ToolData;
use crate::domain::transform::{Transform, BAD_FLOAT};
use crate::protocol::{FrameCursor, ProtocolError};

/// Fixed size of every component header.
pub const COMPONENT_HEADER_BYTES: usize = 12;

/// Component types assigned by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ComponentType {
    Frame = 0x0001,
    Data6D = 0x0002,
    Data3D = 0x0003,
    Button1D = 0x0004,
    Data2D = 0x0005,
    Uv = 0x0011,
    SystemAlert = 0x0012,
}

impl TryFrom<u16> for ComponentType {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Frame),
            0x0002 => Ok(Self::Data6D),
            0x0003 => Ok(Self::Data3D),
            0x0004 => Ok(Self::Button1D),
            0x0005 => Ok(Self::Data2D),
            0x0011 => Ok(Self::Uv),
            0x0012 => Ok(Self::SystemAlert),
            _ => Err(()),
        }
    }
}

/// Raw header of one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentHeader {
    pub component_type: u16,
    /// Total bytes of the component, header included.
    pub size: u32,
    pub item_option: u16,
    pub item_count: u32,
}

/// Metadata and nested data of one measurement frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameItem {
    pub frame_type: u8,
    pub frame_sequence_index: u8,
    pub frame_status: u16,
    pub frame_number: u32,
    pub timespec_s: u32,
    pub timespec_ns: u32,
    pub container: GbfContainer,
}

/// 3D marker data as two index-aligned lists: `markers[i]` belongs to
/// `tool_handles[i]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GbfData3D {
    pub tool_handles: Vec<u16>,
    pub markers: Vec<Vec<MarkerData>>,
}

/// Button states as two index-aligned lists, one byte per button.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GbfButton1D {
    pub tool_handles: Vec<u16>,
    pub buttons: Vec<Vec<u8>>,
}

/// One decoded component. Types without a decoder, and types this reader
/// has never heard of, land in `Unknown` with their raw payload.
#[derive(Debug, Clone, PartialEq)]
pub enum GbfComponent {
    Frame(Vec<FrameItem>),
    Data6D(Vec<Transform>),
    Data3D(GbfData3D),
    Button1D(GbfButton1D),
    SystemAlert(Vec<SystemAlert>),
    Unknown {
        header: ComponentHeader,
        payload: Vec<u8>,
    },
}

/// A decoded container: format version plus its components in reply order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GbfContainer {
    pub version: u16,
    pub components: Vec<GbfComponent>,
}

// ── Decoding ────────────────────────────────────────────────────────

/// Decodes a whole reply payload as one container.
///
/// # Errors
///
/// [`ProtocolError::Truncated`] when the payload ends inside a declared
/// structure and [`ProtocolError::ComponentOverrun`] when a component's size
/// field is inconsistent with the container.
pub fn decode(payload: &[u8]) -> Result<GbfContainer, ProtocolError> {
    let mut cursor = FrameCursor::new(payload);
    let container = decode_container(&mut cursor)?;
    if cursor.remaining() > 0 {
        debug!(bytes = cursor.remaining(), "ignoring trailing container bytes");
    }
    Ok(container)
}

/// Decodes a reply payload and folds it into per-tool records.
pub fn decode_tracking_payload(payload: &[u8]) -> Result<Vec<ToolData>, ProtocolError> {
    Ok(assemble_tool_data(&decode(payload)?))
}

fn decode_container(cursor: &mut FrameCursor) -> Result<GbfContainer, ProtocolError> {
    let version = cursor.read_u16()?;
    let count = cursor.read_u16()?;
    let mut components = Vec::new();
    for _ in 0..count {
        components.push(decode_component(cursor)?);
    }
    Ok(GbfContainer {
        version,
        components,
    })
}

fn decode_component(cursor: &mut FrameCursor) -> Result<GbfComponent, ProtocolError> {
    let header = ComponentHeader {
        component_type: cursor.read_u16()?,
        size: cursor.read_u32()?,
        item_option: cursor.read_u16()?,
        item_count: cursor.read_u32()?,
    };
    let declared = header.size as usize;
    if declared < COMPONENT_HEADER_BYTES || declared - COMPONENT_HEADER_BYTES > cursor.remaining()
    {
        return Err(ProtocolError::ComponentOverrun {
            component_type: header.component_type,
            declared,
            available: COMPONENT_HEADER_BYTES + cursor.remaining(),
        });
    }

    // Slicing the payload out pins the outer cursor's advance to exactly
    // `size` bytes no matter what the item decoders do inside.
    let payload = cursor.read_bytes(declared - COMPONENT_HEADER_BYTES)?;
    let mut items = FrameCursor::new(payload);

    let component = match ComponentType::try_from(header.component_type) {
        Ok(ComponentType::Frame) => {
            GbfComponent::Frame(decode_frame_items(&mut items, header.item_count)?)
        }
        Ok(ComponentType::Data6D) => {
            GbfComponent::Data6D(decode_pose_items(&mut items, header.item_count)?)
        }
        Ok(ComponentType::Data3D) => {
            GbfComponent::Data3D(decode_marker_items(&mut items, header.item_count)?)
        }
        Ok(ComponentType::Button1D) => {
            GbfComponent::Button1D(decode_button_items(&mut items, header.item_count)?)
        }
        Ok(ComponentType::SystemAlert) => {
            GbfComponent::SystemAlert(decode_alert_items(&mut items, header.item_count)?)
        }
        Ok(ComponentType::Data2D) | Ok(ComponentType::Uv) | Err(()) => {
            return Ok(GbfComponent::Unknown {
                header,
                payload: payload.to_vec(),
            });
        }
    };

    if items.remaining() > 0 {
        // Option bits can append per-item data this decoder does not model.
        debug!(
            component_type = header.component_type,
            bytes = items.remaining(),
            "ignoring trailing component bytes"
        );
    }
    Ok(component)
}

fn decode_frame_items(
    cursor: &mut FrameCursor,
    count: u32,
) -> Result<Vec<FrameItem>, ProtocolError> {
    let mut frames = Vec::new();
    for _ in 0..count {
        frames.push(FrameItem {
            frame_type: cursor.read_u8()?,
            frame_sequence_index: cursor.read_u8()?,
            frame_status: cursor.read_u16()?,
            frame_number: cursor.read_u32()?,
            timespec_s: cursor.read_u32()?,
            timespec_ns: cursor.read_u32()?,
            container: decode_container(cursor)?,
        });
    }
    Ok(frames)
}

fn decode_pose_items(
    cursor: &mut FrameCursor,
    count: u32,
) -> Result<Vec<Transform>, ProtocolError> {
    let mut poses = Vec::new();
    for _ in 0..count {
        let mut transform = Transform {
            tool_handle: cursor.read_u16()?,
            status: cursor.read_u16()?,
            q0: f64::from(cursor.read_f32()?),
            qx: f64::from(cursor.read_f32()?),
            qy: f64::from(cursor.read_f32()?),
            qz: f64::from(cursor.read_f32()?),
            tx: f64::from(cursor.read_f32()?),
            ty: f64::from(cursor.read_f32()?),
            tz: f64::from(cursor.read_f32()?),
            error: f64::from(cursor.read_f32()?),
        };
        if transform.is_missing() {
            // The item is fixed width, so the fields were read regardless;
            // a missing pose reports sentinels, not stale numbers.
            transform.q0 = BAD_FLOAT;
            transform.qx = BAD_FLOAT;
            transform.qy = BAD_FLOAT;
            transform.qz = BAD_FLOAT;
            transform.tx = BAD_FLOAT;
            transform.ty = BAD_FLOAT;
            transform.tz = BAD_FLOAT;
            transform.error = BAD_FLOAT;
        }
        poses.push(transform);
    }
    Ok(poses)
}

fn decode_marker_items(cursor: &mut FrameCursor, count: u32) -> Result<GbfData3D, ProtocolError> {
    let mut data = GbfData3D::default();
    for _ in 0..count {
        let handle = cursor.read_u16()?;
        let marker_count = cursor.read_u16()?;
        let mut markers = Vec::new();
        for _ in 0..marker_count {
            let status = cursor.read_u8()?;
            let _reserved = cursor.read_u8()?;
            markers.push(MarkerData {
                status,
                marker_index: cursor.read_u16()?,
                x: f64::from(cursor.read_f32()?),
                y: f64::from(cursor.read_f32()?),
                z: f64::from(cursor.read_f32()?),
            });
        }
        data.tool_handles.push(handle);
        data.markers.push(markers);
    }
    Ok(data)
}

fn decode_button_items(
    cursor: &mut FrameCursor,
    count: u32,
) -> Result<GbfButton1D, ProtocolError> {
    let mut data = GbfButton1D::default();
    for _ in 0..count {
        let handle = cursor.read_u16()?;
        let button_count = cursor.read_u16()?;
        let mut buttons = Vec::new();
        for _ in 0..button_count {
            buttons.push(cursor.read_u8()?);
        }
        data.tool_handles.push(handle);
        data.buttons.push(buttons);
    }
    Ok(data)
}

fn decode_alert_items(
    cursor: &mut FrameCursor,
    count: u32,
) -> Result<Vec<SystemAlert>, ProtocolError> {
    let mut alerts = Vec::new();
    for _ in 0..count {
        let condition_type = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        alerts.push(SystemAlert::new(condition_type, cursor.read_u16()?));
    }
    Ok(alerts)
}

// ── Per-tool assembly ───────────────────────────────────────────────

/// Folds a decoded container into one [`ToolData`] per handle, in order of
/// first appearance. Frame metadata is stamped onto the tools of that
/// frame's nested components, and alert conditions attach to every tool in
/// the container they were reported in.
pub fn assemble_tool_data(container: &GbfContainer) -> Vec<ToolData> {
    let mut tools = Vec::new();
    merge_container(&mut tools, container);
    tools
}

fn merge_container(tools: &mut Vec<ToolData>, container: &GbfContainer) {
    let mut alerts: Vec<SystemAlert> = Vec::new();

    for component in &container.components {
        match component {
            GbfComponent::Frame(items) => {
                for item in items {
                    let mut frame_tools = Vec::new();
                    merge_container(&mut frame_tools, &item.container);
                    for mut tool in frame_tools {
                        tool.frame_type = item.frame_type;
                        tool.frame_sequence_index = item.frame_sequence_index;
                        tool.frame_status = item.frame_status;
                        tool.frame_number = item.frame_number;
                        tool.timespec_s = item.timespec_s;
                        tool.timespec_ns = item.timespec_ns;
                        replace_or_push(tools, tool);
                    }
                }
            }
            GbfComponent::Data6D(poses) => {
                for pose in poses {
                    let tool = entry(tools, pose.tool_handle);
                    tool.transform = pose.clone();
                    tool.data_is_new = true;
                }
            }
            GbfComponent::Data3D(data) => {
                for (handle, markers) in data.tool_handles.iter().zip(&data.markers) {
                    let tool = entry(tools, *handle);
                    tool.markers = markers.clone();
                    tool.data_is_new = true;
                }
            }
            GbfComponent::Button1D(data) => {
                for (handle, buttons) in data.tool_handles.iter().zip(&data.buttons) {
                    let tool = entry(tools, *handle);
                    tool.buttons = buttons.clone();
                    tool.data_is_new = true;
                }
            }
            GbfComponent::SystemAlert(reported) => {
                alerts.extend_from_slice(reported);
            }
            GbfComponent::Unknown { header, .. } => {
                debug!(
                    component_type = header.component_type,
                    size = header.size,
                    "skipped component without a decoder"
                );
            }
        }
    }

    if !alerts.is_empty() {
        for tool in tools.iter_mut() {
            tool.system_alerts.extend_from_slice(&alerts);
        }
    }
}

fn entry<'a>(tools: &'a mut Vec<ToolData>, handle: u16) -> &'a mut ToolData {
    let index = match tools.iter().position(|tool| tool.tool_handle() == handle) {
        Some(index) => index,
        None => {
            tools.push(ToolData::for_handle(handle));
            tools.len() - 1
        }
    };
    &mut tools[index]
}

fn replace_or_push(tools: &mut Vec<ToolData>, tool: ToolData) {
    match tools
        .iter()
        .position(|existing| existing.tool_handle() == tool.tool_handle())
    {
        Some(index) => tools[index] = tool,
        None => tools.push(tool),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::marker::MarkerStatus;

    // ── Fixture builders ──

    fn component(component_type: u16, item_option: u16, item_count: u32, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&component_type.to_le_bytes());
        bytes.extend_from_slice(&((COMPONENT_HEADER_BYTES + payload.len()) as u32).to_le_bytes());
        bytes.extend_from_slice(&item_option.to_le_bytes());
        bytes.extend_from_slice(&item_count.to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    fn container(components: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u16.to_le_bytes()); // version
        bytes.extend_from_slice(&(components.len() as u16).to_le_bytes());
        for component in components {
            bytes.extend_from_slice(component);
        }
        bytes
    }

    fn pose_item(handle: u16, status: u16, values: [f32; 8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&handle.to_le_bytes());
        bytes.extend_from_slice(&status.to_le_bytes());
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    fn marker_record(status: u8, index: u16, x: f32, y: f32, z: f32) -> Vec<u8> {
        let mut bytes = vec![status, 0x00];
        bytes.extend_from_slice(&index.to_le_bytes());
        bytes.extend_from_slice(&x.to_le_bytes());
        bytes.extend_from_slice(&y.to_le_bytes());
        bytes.extend_from_slice(&z.to_le_bytes());
        bytes
    }

    fn frame_item(frame_number: u32, nested: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0x02, 0x07]; // passive frame, sequence index 7
        bytes.extend_from_slice(&0u16.to_le_bytes()); // frame status
        bytes.extend_from_slice(&frame_number.to_le_bytes());
        bytes.extend_from_slice(&10u32.to_le_bytes()); // timespec seconds
        bytes.extend_from_slice(&500u32.to_le_bytes()); // timespec nanoseconds
        bytes.extend_from_slice(nested);
        bytes
    }

    const POSE: [f32; 8] = [1.0, 0.0, 0.0, 0.0, 12.5, -3.25, 150.0, 0.25];

    // ── Component decoding ──

    #[test]
    fn test_decode_single_pose() {
        let payload = container(&[component(0x0002, 0, 1, &pose_item(0x0A, 0, POSE))]);

        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.components.len(), 1);
        let GbfComponent::Data6D(poses) = &decoded.components[0] else {
            panic!("expected a pose component, got {:?}", decoded.components[0]);
        };
        assert_eq!(poses[0].tool_handle, 0x0A);
        assert_eq!(poses[0].tx, 12.5);
        assert!(!poses[0].is_missing());
    }

    #[test]
    fn test_missing_pose_reports_sentinels() {
        let payload = container(&[component(0x0002, 0, 1, &pose_item(0x0A, 0x0100, POSE))]);

        let decoded = decode(&payload).unwrap();
        let GbfComponent::Data6D(poses) = &decoded.components[0] else {
            panic!("expected a pose component");
        };
        assert!(poses[0].is_missing());
        assert!(Transform::is_bad_float(poses[0].q0));
        assert!(Transform::is_bad_float(poses[0].tz));
    }

    #[test]
    fn test_unknown_component_is_carried_raw() {
        let unknown = component(0x0099, 0, 1, &[0xDE, 0xAD, 0xBE, 0xEF, 0x00]);
        let pose = component(0x0002, 0, 1, &pose_item(0x0B, 0, POSE));
        let payload = container(&[unknown, pose]);

        let decoded = decode(&payload).unwrap();
        assert_eq!(decoded.components.len(), 2);
        let GbfComponent::Unknown { header, payload } = &decoded.components[0] else {
            panic!("expected the unknown component first");
        };
        assert_eq!(header.component_type, 0x0099);
        assert_eq!(header.size, 17);
        assert_eq!(payload, &[0xDE, 0xAD, 0xBE, 0xEF, 0x00]);
        // The component after the unknown one decodes normally.
        assert!(matches!(&decoded.components[1], GbfComponent::Data6D(_)));
    }

    #[test]
    fn test_every_component_advances_exactly_its_declared_size() {
        // One of each: known, known with trailing option bytes, unknown.
        let mut padded_pose = pose_item(0x0A, 0, POSE);
        padded_pose.extend_from_slice(&[0xFF; 4]);
        let parts = [
            component(0x0002, 0, 1, &pose_item(0x0B, 0, POSE)),
            component(0x0002, 0x0001, 1, &padded_pose),
            component(0x0099, 0, 1, &[0x00; 9]),
        ];

        for part in &parts {
            let mut cursor = FrameCursor::new(part);
            decode_component(&mut cursor).unwrap();
            assert_eq!(cursor.position(), part.len(), "component must consume its size");
        }
    }

    #[test]
    fn test_declared_size_past_container_end_is_an_overrun() {
        let mut bad = component(0x0002, 0, 1, &pose_item(0x0A, 0, POSE));
        // Inflate the size field beyond the available bytes.
        bad[2..6].copy_from_slice(&500u32.to_le_bytes());
        let payload = container(&[bad]);

        let err = decode(&payload).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ComponentOverrun {
                component_type: 0x0002,
                declared: 500,
                ..
            }
        ));
    }

    #[test]
    fn test_declared_size_smaller_than_header_is_an_overrun() {
        let mut bad = component(0x0099, 0, 0, &[]);
        bad[2..6].copy_from_slice(&4u32.to_le_bytes());
        let payload = container(&[bad]);

        assert!(matches!(
            decode(&payload).unwrap_err(),
            ProtocolError::ComponentOverrun { declared: 4, .. }
        ));
    }

    #[test]
    fn test_marker_lists_stay_index_aligned() {
        let mut tool = Vec::new();
        tool.extend_from_slice(&0x000Au16.to_le_bytes());
        tool.extend_from_slice(&2u16.to_le_bytes());
        tool.extend_from_slice(&marker_record(0x00, 0, 1.0, 2.0, 3.0));
        tool.extend_from_slice(&marker_record(0x05, 1, -4.5, 0.25, 99.0));
        let payload = container(&[component(0x0003, 0, 1, &tool)]);

        let decoded = decode(&payload).unwrap();
        let GbfComponent::Data3D(data) = &decoded.components[0] else {
            panic!("expected a marker component");
        };
        assert_eq!(data.tool_handles, vec![0x000A]);
        assert_eq!(data.markers.len(), 1);
        assert_eq!(data.markers[0].len(), 2);
        assert_eq!(data.markers[0][0].x, 1.0);
        assert_eq!(data.markers[0][1].marker_index, 1);
        assert_eq!(
            MarkerStatus::try_from(data.markers[0][1].status),
            Ok(MarkerStatus::OutOfVolume)
        );
    }

    #[test]
    fn test_truncated_pose_item_fails_inside_component() {
        // Declares one pose item but carries half of one.
        let payload = container(&[component(0x0002, 0, 1, &pose_item(0x0A, 0, POSE)[..20])]);
        assert!(matches!(
            decode(&payload).unwrap_err(),
            ProtocolError::Truncated { .. }
        ));
    }

    // ── Assembly ──

    #[test]
    fn test_frame_metadata_is_stamped_onto_tools() {
        let nested = container(&[
            component(0x0002, 0, 1, &pose_item(0x0A, 0, POSE)),
            component(0x0012, 0, 1, &[0x02, 0x00, 0x02, 0x00]), // event: tool unplugged
        ]);
        let payload = container(&[component(0x0001, 0, 1, &frame_item(1234, &nested))]);

        let tools = decode_tracking_payload(&payload).unwrap();
        assert_eq!(tools.len(), 1);
        let tool = &tools[0];
        assert_eq!(tool.tool_handle(), 0x0A);
        assert_eq!(tool.frame_number, 1234);
        assert_eq!(tool.frame_type, 0x02);
        assert_eq!(tool.frame_sequence_index, 7);
        assert_eq!(tool.timespec_s, 10);
        assert_eq!(tool.timespec_ns, 500);
        assert!(tool.data_is_new);
        assert_eq!(tool.system_alerts.len(), 1);
        assert_eq!(tool.system_alerts[0].to_string(), "Event: ToolUnplugged");
    }

    #[test]
    fn test_alerts_scope_to_their_frame() {
        let first = container(&[
            component(0x0002, 0, 1, &pose_item(0x0A, 0, POSE)),
            component(0x0012, 0, 1, &[0x00, 0x00, 0x03, 0x00]), // fault
        ]);
        let second = container(&[component(0x0002, 0, 1, &pose_item(0x0B, 0, POSE))]);
        let mut items = frame_item(1, &first);
        items.extend_from_slice(&frame_item(2, &second));
        let payload = container(&[component(0x0001, 0, 2, &items)]);

        let tools = decode_tracking_payload(&payload).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].system_alerts.len(), 1);
        assert!(tools[1].system_alerts.is_empty());
    }

    #[test]
    fn test_components_merge_by_handle() {
        let mut markers = Vec::new();
        markers.extend_from_slice(&0x000Au16.to_le_bytes());
        markers.extend_from_slice(&1u16.to_le_bytes());
        markers.extend_from_slice(&marker_record(0x00, 0, 5.0, 6.0, 7.0));
        let mut buttons = Vec::new();
        buttons.extend_from_slice(&0x000Au16.to_le_bytes());
        buttons.extend_from_slice(&2u16.to_le_bytes());
        buttons.extend_from_slice(&[0x01, 0x00]);

        let payload = container(&[
            component(0x0002, 0, 1, &pose_item(0x0A, 0, POSE)),
            component(0x0003, 0, 1, &markers),
            component(0x0004, 0, 1, &buttons),
        ]);

        let tools = decode_tracking_payload(&payload).unwrap();
        assert_eq!(tools.len(), 1);
        let tool = &tools[0];
        assert_eq!(tool.transform.tx, 12.5);
        assert_eq!(tool.markers.len(), 1);
        assert_eq!(tool.buttons, vec![0x01, 0x00]);
    }

    #[test]
    fn test_tools_keep_reply_order() {
        let payload = container(&[
            component(0x0002, 0, 2, &{
                let mut two = pose_item(0x0C, 0, POSE);
                two.extend_from_slice(&pose_item(0x0A, 0, POSE));
                two
            }),
        ]);

        let tools = decode_tracking_payload(&payload).unwrap();
        assert_eq!(tools[0].tool_handle(), 0x0C);
        assert_eq!(tools[1].tool_handle(), 0x0A);
    }
}
