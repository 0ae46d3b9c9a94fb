/// Operations a back-end may support.
///
/// Each driver declares a fixed subset; capability checks are subset tests
/// against that declaration. Requesting an operation outside the declared
/// set fails with `DeviceError::Unsupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ReadMemory,
    WriteMemory,
    ResetSystem,
    ResetToMenu,
    PauseUnpauseEmulation,
    ExecuteAsm,
    FetchFields,
    ReadDirectory,
    MakeDirectory,
    RemoveFile,
    RenameFile,
    PutFile,
    GetFile,
    BootFile,
    NwaCommand,
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadMemory => "ReadMemory",
            Self::WriteMemory => "WriteMemory",
            Self::ResetSystem => "ResetSystem",
            Self::ResetToMenu => "ResetToMenu",
            Self::PauseUnpauseEmulation => "PauseUnpauseEmulation",
            Self::ExecuteAsm => "ExecuteASM",
            Self::FetchFields => "FetchFields",
            Self::ReadDirectory => "ReadDirectory",
            Self::MakeDirectory => "MakeDirectory",
            Self::RemoveFile => "RemoveFile",
            Self::RenameFile => "RenameFile",
            Self::PutFile => "PutFile",
            Self::GetFile => "GetFile",
            Self::BootFile => "BootFile",
            Self::NwaCommand => "NWACommand",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Subset test: every requested capability must appear in `declared`.
pub fn check_capabilities(requested: &[Capability], declared: &[Capability]) -> bool {
    requested.iter().all(|c| declared.contains(c))
}
