use crate::registry::{Platform, ToolRecord};

const SYSINTERNALS_LICENSE: &str = "Sysinternals Software License";

/// Built-in table of common forensic tools.
pub fn builtin_tools() -> Vec<ToolRecord> {
    vec![
        // Windows: Sysinternals
        ToolRecord::download(
            "autorunsc",
            Platform::Windows,
            "https://download.sysinternals.com/files/Autoruns.zip",
            SYSINTERNALS_LICENSE,
            "Autostart location enumeration",
        ),
        ToolRecord::download(
            "sigcheck",
            Platform::Windows,
            "https://download.sysinternals.com/files/Sigcheck.zip",
            SYSINTERNALS_LICENSE,
            "File signature and version verification",
        ),
        ToolRecord::download(
            "handle",
            Platform::Windows,
            "https://download.sysinternals.com/files/Handle.zip",
            SYSINTERNALS_LICENSE,
            "Open handle listing",
        ),
        ToolRecord::download(
            "pslist",
            Platform::Windows,
            "https://download.sysinternals.com/files/PSTools.zip",
            SYSINTERNALS_LICENSE,
            "Process listing",
        ),
        // Windows: memory and scanning
        ToolRecord::download(
            "winpmem",
            Platform::Windows,
            "https://github.com/Velocidex/WinPmem/releases/download/v4.0.rc1/winpmem_mini_x64_rc2.exe",
            "Apache-2.0",
            "Physical memory acquisition",
        ),
        ToolRecord::download(
            "yara",
            Platform::Windows,
            "https://github.com/VirusTotal/yara/releases/download/v4.5.2/yara-v4.5.2-2326-win64.zip",
            "BSD-3-Clause",
            "Pattern matching scanner",
        ),
        // Windows: system binaries
        ToolRecord::system(
            "powershell",
            Platform::Windows,
            r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe",
            "Proprietary",
            "Windows PowerShell",
        ),
        ToolRecord::system(
            "wevtutil",
            Platform::Windows,
            r"C:\Windows\System32\wevtutil.exe",
            "Proprietary",
            "Event log export",
        ),
        // Linux
        ToolRecord::download(
            "avml",
            Platform::Linux,
            "https://github.com/microsoft/avml/releases/download/v0.14.0/avml",
            "MIT",
            "Volatile memory acquisition",
        ),
        ToolRecord::download(
            "osqueryi",
            Platform::Linux,
            "https://pkg.osquery.io/linux/osquery-5.12.1_1.linux_x86_64.tar.gz",
            "Apache-2.0",
            "Interactive osquery shell",
        ),
        ToolRecord::download(
            "velociraptor",
            Platform::Linux,
            "https://github.com/Velocidex/velociraptor/releases/download/v0.7.1/velociraptor-v0.7.1-linux-amd64",
            "AGPL-3.0",
            "Endpoint collection engine",
        ),
        ToolRecord::system("lsof", Platform::Linux, "/usr/bin/lsof", "GPL-2.0", "Open file listing"),
        ToolRecord::system("netstat", Platform::Linux, "/bin/netstat", "GPL-2.0", "Network connection listing"),
        ToolRecord::system("ss", Platform::Linux, "/usr/bin/ss", "GPL-2.0", "Socket statistics"),
        ToolRecord::system("ps", Platform::Linux, "/bin/ps", "GPL-2.0", "Process listing"),
        // macOS
        ToolRecord::system("log", Platform::MacOS, "/usr/bin/log", "Proprietary", "Unified log access"),
        ToolRecord::system("plutil", Platform::MacOS, "/usr/bin/plutil", "Proprietary", "Property list conversion"),
        ToolRecord::system("codesign", Platform::MacOS, "/usr/bin/codesign", "Proprietary", "Code signature inspection"),
    ]
}
