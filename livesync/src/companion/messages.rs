//! Message ids of the companion protocol.
//!
//! Ids are stable strings. The ordinal each one maps to is negotiated per
//! connection.

use crate::protocol::ProtocolVersion;

pub const PROTOCOL_NAME: &str = "CompanionApp";
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

/// Sent by the host.
pub mod to_client {
    pub const INITIALIZE: &str = "CompanionApp_ToClient_Initialize";
    pub const END_SESSION: &str = "CompanionApp_ToClient_EndSession";
    pub const SERVER_STATE: &str = "CompanionApp_ToClient_ServerState";
    pub const PLAYER_STATE: &str = "CompanionApp_ToClient_PlayerState";
    pub const FRAME_RATE: &str = "CompanionApp_ToClient_FrameRate";
    pub const TAKE_LIST_V0: &str = "CompanionApp_ToClient_TakeList_V0";
    pub const SELECTED_TAKE: &str = "CompanionApp_ToClient_SelectedTake";
    pub const NEXT_TAKE_NAME: &str = "CompanionApp_ToClient_NextTakeName";
}

/// Sent by the companion device.
pub mod to_server {
    pub const SET_DEVICE_MODE: &str = "CompanionApp_ToServer_SetDeviceMode";
    pub const START_RECORDING: &str = "CompanionApp_ToServer_StartRecording";
    pub const STOP_RECORDING: &str = "CompanionApp_ToServer_StopRecording";
    pub const PLAYER_START: &str = "CompanionApp_ToServer_PlayerStart";
    pub const PLAYER_STOP: &str = "CompanionApp_ToServer_PlayerStop";
    pub const PLAYER_PAUSE: &str = "CompanionApp_ToServer_PlayerPause";
    pub const PLAYER_SET_TIME: &str = "CompanionApp_ToServer_PlayerSetTime";
    pub const SET_SELECTED_TAKE: &str = "CompanionApp_ToServer_SetSelectedTake";
    pub const SET_TAKE_DATA_V0: &str = "CompanionApp_ToServer_SetTakeData_V0";
    pub const DELETE_TAKE: &str = "CompanionApp_ToServer_DeleteTake";
}
