//! SMPP v3.4 command identifiers and command status codes

use std::fmt;

/// SMPP command IDs
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    BindReceiver = 0x00000001,
    BindReceiverResp = 0x80000001,
    BindTransmitter = 0x00000002,
    BindTransmitterResp = 0x80000002,
    BindTransceiver = 0x00000009,
    BindTransceiverResp = 0x80000009,
    SubmitSm = 0x00000004,
    SubmitSmResp = 0x80000004,
    DeliverSm = 0x00000005,
    DeliverSmResp = 0x80000005,
    EnquireLink = 0x00000015,
    EnquireLinkResp = 0x80000015,
    Unbind = 0x00000006,
    UnbindResp = 0x80000006,
    GenericNack = 0x80000000,
}

impl CommandId {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x00000001 => Some(Self::BindReceiver),
            0x80000001 => Some(Self::BindReceiverResp),
            0x00000002 => Some(Self::BindTransmitter),
            0x80000002 => Some(Self::BindTransmitterResp),
            0x00000009 => Some(Self::BindTransceiver),
            0x80000009 => Some(Self::BindTransceiverResp),
            0x00000004 => Some(Self::SubmitSm),
            0x80000004 => Some(Self::SubmitSmResp),
            0x00000005 => Some(Self::DeliverSm),
            0x80000005 => Some(Self::DeliverSmResp),
            0x00000015 => Some(Self::EnquireLink),
            0x80000015 => Some(Self::EnquireLinkResp),
            0x00000006 => Some(Self::Unbind),
            0x80000006 => Some(Self::UnbindResp),
            0x80000000 => Some(Self::GenericNack),
            _ => None,
        }
    }

    pub fn is_response(&self) -> bool {
        (*self as u32) & 0x80000000 != 0
    }
}

/// command_status field of a PDU header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CommandStatus(pub u32);

impl CommandStatus {
    pub const ESME_ROK: Self = Self(0x00);
    pub const ESME_RINVMSGLEN: Self = Self(0x01);
    pub const ESME_RINVCMDLEN: Self = Self(0x02);
    pub const ESME_RINVCMDID: Self = Self(0x03);
    pub const ESME_RINVBNDSTS: Self = Self(0x04);
    pub const ESME_RALYBND: Self = Self(0x05);
    pub const ESME_RSYSERR: Self = Self(0x08);
    pub const ESME_RINVDSTADR: Self = Self(0x0B);
    pub const ESME_RBINDFAIL: Self = Self(0x0D);
    pub const ESME_RINVPASWD: Self = Self(0x0E);
    pub const ESME_RMSGQFUL: Self = Self(0x14);
    pub const ESME_RSUBMITFAIL: Self = Self(0x45);
    pub const ESME_RTHROTTLED: Self = Self(0x58);
    pub const ESME_RUNKNOWNERR: Self = Self(0xFF);

    pub fn is_ok(&self) -> bool {
        *self == Self::ESME_ROK
    }

    /// Symbolic name from the v3.4 status table, if the code is known
    pub fn name(&self) -> Option<&'static str> {
        let name = match self.0 {
            0x00 => "ESME_ROK",
            0x01 => "ESME_RINVMSGLEN",
            0x02 => "ESME_RINVCMDLEN",
            0x03 => "ESME_RINVCMDID",
            0x04 => "ESME_RINVBNDSTS",
            0x05 => "ESME_RALYBND",
            0x06 => "ESME_RINVPRTFLG",
            0x07 => "ESME_RINVREGDLVFLG",
            0x08 => "ESME_RSYSERR",
            0x0A => "ESME_RINVSRCADR",
            0x0B => "ESME_RINVDSTADR",
            0x0C => "ESME_RINVMSGID",
            0x0D => "ESME_RBINDFAIL",
            0x0E => "ESME_RINVPASWD",
            0x0F => "ESME_RINVSYSID",
            0x11 => "ESME_RCANCELFAIL",
            0x13 => "ESME_RREPLACEFAIL",
            0x14 => "ESME_RMSGQFUL",
            0x15 => "ESME_RINVSERTYP",
            0x33 => "ESME_RINVNUMDESTS",
            0x34 => "ESME_RINVDLNAME",
            0x40 => "ESME_RINVDESTFLAG",
            0x42 => "ESME_RINVSUBREP",
            0x43 => "ESME_RINVESMCLASS",
            0x44 => "ESME_RCNTSUBDL",
            0x45 => "ESME_RSUBMITFAIL",
            0x48 => "ESME_RINVSRCTON",
            0x49 => "ESME_RINVSRCNPI",
            0x50 => "ESME_RINVDSTTON",
            0x51 => "ESME_RINVDSTNPI",
            0x53 => "ESME_RINVSYSTYP",
            0x54 => "ESME_RINVREPFLAG",
            0x55 => "ESME_RINVNUMMSGS",
            0x58 => "ESME_RTHROTTLED",
            0x61 => "ESME_RINVSCHED",
            0x62 => "ESME_RINVEXPIRY",
            0x63 => "ESME_RINVDFTMSGID",
            0x64 => "ESME_RX_T_APPN",
            0x65 => "ESME_RX_P_APPN",
            0x66 => "ESME_RX_R_APPN",
            0x67 => "ESME_RQUERYFAIL",
            0xC0 => "ESME_RINVOPTPARSTREAM",
            0xC1 => "ESME_ROPTPARNOTALLWD",
            0xC2 => "ESME_RINVPARLEN",
            0xC3 => "ESME_RMISSINGOPTPARAM",
            0xC4 => "ESME_RINVOPTPARAMVAL",
            0xFE => "ESME_RDELIVERYFAILURE",
            0xFF => "ESME_RUNKNOWNERR",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}
