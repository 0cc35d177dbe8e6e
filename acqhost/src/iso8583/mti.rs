use crate::Error;
use std::convert::TryFrom;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MtiVersion {
    Iso8583Year1987,
    Iso8583Year1993,
    Iso8583Year2003,
    Reserved3,
    Reserved4,
    Reserved5,
    Reserved6,
    Reserved7,
    NationalUse,
    PrivateUse,
}

impl From<MtiVersion> for u8 {
    fn from(orig: MtiVersion) -> Self {
        match orig {
            MtiVersion::Iso8583Year1987 => 0,
            MtiVersion::Iso8583Year1993 => 1,
            MtiVersion::Iso8583Year2003 => 2,
            MtiVersion::Reserved3 => 3,
            MtiVersion::Reserved4 => 4,
            MtiVersion::Reserved5 => 5,
            MtiVersion::Reserved6 => 6,
            MtiVersion::Reserved7 => 7,
            MtiVersion::NationalUse => 8,
            MtiVersion::PrivateUse => 9,
        }
    }
}

impl TryFrom<u8> for MtiVersion {
    type Error = &'static str;

    fn try_from(orig: u8) -> Result<Self, Self::Error> {
        match orig {
            0 => Ok(MtiVersion::Iso8583Year1987),
            1 => Ok(MtiVersion::Iso8583Year1993),
            2 => Ok(MtiVersion::Iso8583Year2003),
            3 => Ok(MtiVersion::Reserved3),
            4 => Ok(MtiVersion::Reserved4),
            5 => Ok(MtiVersion::Reserved5),
            6 => Ok(MtiVersion::Reserved6),
            7 => Ok(MtiVersion::Reserved7),
            8 => Ok(MtiVersion::NationalUse),
            9 => Ok(MtiVersion::PrivateUse),
            _ => Err("Unknown version digit!"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MtiClass {
    Reserved0,
    Authorization,
    Financial,
    FileActions,
    ReversalOrChargeback,
    Reconciliation,
    Administrative,
    FeeCollection,
    NetworkManagement,
    Reserved9,
}

impl From<MtiClass> for u8 {
    fn from(orig: MtiClass) -> Self {
        match orig {
            MtiClass::Reserved0 => 0,
            MtiClass::Authorization => 1,
            MtiClass::Financial => 2,
            MtiClass::FileActions => 3,
            MtiClass::ReversalOrChargeback => 4,
            MtiClass::Reconciliation => 5,
            MtiClass::Administrative => 6,
            MtiClass::FeeCollection => 7,
            MtiClass::NetworkManagement => 8,
            MtiClass::Reserved9 => 9,
        }
    }
}

impl TryFrom<u8> for MtiClass {
    type Error = &'static str;

    fn try_from(orig: u8) -> Result<Self, Self::Error> {
        match orig {
            0 => Ok(MtiClass::Reserved0),
            1 => Ok(MtiClass::Authorization),
            2 => Ok(MtiClass::Financial),
            3 => Ok(MtiClass::FileActions),
            4 => Ok(MtiClass::ReversalOrChargeback),
            5 => Ok(MtiClass::Reconciliation),
            6 => Ok(MtiClass::Administrative),
            7 => Ok(MtiClass::FeeCollection),
            8 => Ok(MtiClass::NetworkManagement),
            9 => Ok(MtiClass::Reserved9),
            _ => Err("Unknown class digit!"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MtiFunction {
    Request,
    RequestResponse,
    Advice,
    AdviceResponse,
    Notification,
    NotificationAcknowledgement,
    Instruction,
    InstructionAcknowledgement,
    Reserved8,
    Reserved9,
}

impl From<MtiFunction> for u8 {
    fn from(orig: MtiFunction) -> Self {
        match orig {
            MtiFunction::Request => 0,
            MtiFunction::RequestResponse => 1,
            MtiFunction::Advice => 2,
            MtiFunction::AdviceResponse => 3,
            MtiFunction::Notification => 4,
            MtiFunction::NotificationAcknowledgement => 5,
            MtiFunction::Instruction => 6,
            MtiFunction::InstructionAcknowledgement => 7,
            MtiFunction::Reserved8 => 8,
            MtiFunction::Reserved9 => 9,
        }
    }
}

impl TryFrom<u8> for MtiFunction {
    type Error = &'static str;

    fn try_from(orig: u8) -> Result<Self, Self::Error> {
        match orig {
            0 => Ok(MtiFunction::Request),
            1 => Ok(MtiFunction::RequestResponse),
            2 => Ok(MtiFunction::Advice),
            3 => Ok(MtiFunction::AdviceResponse),
            4 => Ok(MtiFunction::Notification),
            5 => Ok(MtiFunction::NotificationAcknowledgement),
            6 => Ok(MtiFunction::Instruction),
            7 => Ok(MtiFunction::InstructionAcknowledgement),
            8 => Ok(MtiFunction::Reserved8),
            9 => Ok(MtiFunction::Reserved9),
            _ => Err("Unknown function digit!"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MtiOrigin {
    Acquirer,
    AcquirerRepeat,
    Issuer,
    IssuerRepeat,
    OtherOrigin,
    Reserved5,
    Reserved6,
    Reserved7,
    Reserved8,
    Reserved9,
}

impl From<MtiOrigin> for u8 {
    fn from(orig: MtiOrigin) -> Self {
        match orig {
            MtiOrigin::Acquirer => 0,
            MtiOrigin::AcquirerRepeat => 1,
            MtiOrigin::Issuer => 2,
            MtiOrigin::IssuerRepeat => 3,
            MtiOrigin::OtherOrigin => 4,
            MtiOrigin::Reserved5 => 5,
            MtiOrigin::Reserved6 => 6,
            MtiOrigin::Reserved7 => 7,
            MtiOrigin::Reserved8 => 8,
            MtiOrigin::Reserved9 => 9,
        }
    }
}

impl TryFrom<u8> for MtiOrigin {
    type Error = &'static str;

    fn try_from(orig: u8) -> Result<Self, Self::Error> {
        match orig {
            0 => Ok(MtiOrigin::Acquirer),
            1 => Ok(MtiOrigin::AcquirerRepeat),
            2 => Ok(MtiOrigin::Issuer),
            3 => Ok(MtiOrigin::IssuerRepeat),
            4 => Ok(MtiOrigin::OtherOrigin),
            5 => Ok(MtiOrigin::Reserved5),
            6 => Ok(MtiOrigin::Reserved6),
            7 => Ok(MtiOrigin::Reserved7),
            8 => Ok(MtiOrigin::Reserved8),
            9 => Ok(MtiOrigin::Reserved9),
            _ => Err("Unknown origin digit!"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Mti {
    pub version: MtiVersion,
    pub class: MtiClass,
    pub function: MtiFunction,
    pub origin: MtiOrigin,
}

impl Mti {
    pub fn parse(value: &str) -> Result<Mti, Error> {
        if value.len() != 4 || !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::BadMti(value.to_string()));
        }

        let digits: Vec<u8> = value.chars().map(|c| c.to_digit(10).unwrap() as u8).collect();

        Ok(Mti {
            version: MtiVersion::try_from(digits[0])
                .map_err(|_| Error::BadMti(value.to_string()))?,
            class: MtiClass::try_from(digits[1]).map_err(|_| Error::BadMti(value.to_string()))?,
            function: MtiFunction::try_from(digits[2])
                .map_err(|_| Error::BadMti(value.to_string()))?,
            origin: MtiOrigin::try_from(digits[3])
                .map_err(|_| Error::BadMti(value.to_string()))?,
        })
    }

    /// The MTI the host answers with: the function digit advances to the
    /// matching response variant, everything else is echoed.
    pub fn response(&self) -> Mti {
        let function = match self.function {
            MtiFunction::Request => MtiFunction::RequestResponse,
            MtiFunction::Advice => MtiFunction::AdviceResponse,
            MtiFunction::Notification => MtiFunction::NotificationAcknowledgement,
            MtiFunction::Instruction => MtiFunction::InstructionAcknowledgement,
            other => other,
        };

        Mti { function, ..*self }
    }
}

impl fmt::Display for Mti {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            u8::from(self.version),
            u8::from(self.class),
            u8::from(self.function),
            u8::from(self.origin)
        )
    }
}
