use std::collections::HashMap;

use aya::{
    Ebpf,
    programs::{ProbeKind as AyaProbeKind, Program},
};
use object::{Object, ObjectSection, ObjectSymbol, SymbolKind};

pub const UPROBE_PREFIX: &str = "uprobe/";
pub const URETPROBE_PREFIX: &str = "uretprobe/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Uprobe,
    Uretprobe,
}

impl ProbeKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ProbeKind::Uprobe => UPROBE_PREFIX,
            ProbeKind::Uretprobe => URETPROBE_PREFIX,
        }
    }
}

/// A uprobe program declared by the artifact and the libc function it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeDescriptor {
    /// Name the loader exposes the program under (its function symbol).
    pub program: String,
    /// ELF section the program was placed in, e.g. `uretprobe/getaddrinfo`.
    pub raw_name: String,
    pub kind: ProbeKind,
    pub target_function: String,
}

impl ProbeDescriptor {
    /// Parses `uprobe/<function>` or `uretprobe/<function>`.
    pub fn parse(raw_name: &str) -> Option<Self> {
        let (kind, target) = if let Some(target) = raw_name.strip_prefix(URETPROBE_PREFIX) {
            (ProbeKind::Uretprobe, target)
        } else if let Some(target) = raw_name.strip_prefix(UPROBE_PREFIX) {
            (ProbeKind::Uprobe, target)
        } else {
            return None;
        };

        if target.is_empty() {
            return None;
        }

        Some(Self {
            program: raw_name.to_string(),
            raw_name: raw_name.to_string(),
            kind,
            target_function: target.to_string(),
        })
    }

    /// Builds the descriptor for `program`, which lives in ELF section
    /// `section`.
    ///
    /// The target comes from the section name. Sections without a target
    /// (a bare `uprobe`, or none known) fall back to the program name, with
    /// the raw name composed from the loader-reported kind.
    pub fn for_program(program: &str, section: Option<&str>, kind: ProbeKind) -> Self {
        if let Some(mut probe) = section.and_then(Self::parse) {
            probe.program = program.to_string();
            return probe;
        }

        Self::parse(program).unwrap_or_else(|| Self {
            program: program.to_string(),
            raw_name: format!("{}{}", kind.prefix(), program),
            kind,
            target_function: program.to_string(),
        })
    }
}

/// Maps each function symbol of an eBPF object to the name of its section.
///
/// aya names programs after their function symbol, while the probe's target
/// is only spelled out in the section name.
pub fn program_sections(data: &[u8]) -> Result<HashMap<String, String>, object::Error> {
    let file = object::File::parse(data)?;
    let mut sections = HashMap::new();

    for symbol in file.symbols() {
        if symbol.kind() != SymbolKind::Text {
            continue;
        }
        let Some(index) = symbol.section_index() else {
            continue;
        };
        let (Ok(name), Ok(section)) = (symbol.name(), file.section_by_index(index)) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        if let Ok(section_name) = section.name() {
            sections.insert(name.to_string(), section_name.to_string());
        }
    }

    Ok(sections)
}

/// Uprobe and uretprobe programs declared by a loaded artifact, in raw-name
/// order. `sections` is the artifact's [`program_sections`] map.
pub fn declared_probes(
    bpf: &Ebpf,
    sections: &HashMap<String, String>,
) -> Vec<ProbeDescriptor> {
    let mut probes: Vec<ProbeDescriptor> = bpf
        .programs()
        .filter_map(|(name, program)| match program {
            Program::UProbe(uprobe) => {
                let kind = match uprobe.kind() {
                    AyaProbeKind::URetProbe => ProbeKind::Uretprobe,
                    _ => ProbeKind::Uprobe,
                };
                let section = sections.get(name).map(String::as_str);
                Some(ProbeDescriptor::for_program(name, section, kind))
            }
            _ => None,
        })
        .filter(|probe| !probe.target_function.is_empty())
        .collect();

    probes.sort_by(|a, b| a.raw_name.cmp(&b.raw_name));
    probes
}

#[cfg(test)]
mod tests {
    use object::write;
    use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolScope};

    use super::*;

    // r0 = 0; exit
    const RETURN_ZERO: [u8; 16] = [
        0xb7, 0, 0, 0, 0, 0, 0, 0, //
        0x95, 0, 0, 0, 0, 0, 0, 0,
    ];

    /// An eBPF object with one program per `(section, function)` pair.
    fn bpf_object(programs: &[(&str, &str)]) -> Vec<u8> {
        let mut obj = write::Object::new(BinaryFormat::Elf, Architecture::Bpf, Endianness::Little);

        for (section, function) in programs {
            let id = obj.add_section(
                Vec::new(),
                section.as_bytes().to_vec(),
                SectionKind::Text,
            );
            let offset = obj.append_section_data(id, &RETURN_ZERO, 8);
            obj.add_symbol(write::Symbol {
                name: function.as_bytes().to_vec(),
                value: offset,
                size: RETURN_ZERO.len() as u64,
                kind: SymbolKind::Text,
                scope: SymbolScope::Dynamic,
                weak: false,
                section: write::SymbolSection::Section(id),
                flags: SymbolFlags::None,
            });
        }

        let license = obj.add_section(Vec::new(), b"license".to_vec(), SectionKind::Data);
        obj.append_section_data(license, b"GPL\0", 1);

        obj.write().unwrap()
    }

    #[test]
    fn test_both_prefixes_target_same_function() {
        let entry = ProbeDescriptor::parse("uprobe/getaddrinfo").unwrap();
        let exit = ProbeDescriptor::parse("uretprobe/getaddrinfo").unwrap();

        assert_eq!(entry.target_function, "getaddrinfo");
        assert_eq!(exit.target_function, "getaddrinfo");
        assert_eq!(entry.kind, ProbeKind::Uprobe);
        assert_eq!(exit.kind, ProbeKind::Uretprobe);
    }

    #[test]
    fn test_parse_rejects_unknown_prefix() {
        assert!(ProbeDescriptor::parse("kprobe/getaddrinfo").is_none());
        assert!(ProbeDescriptor::parse("getaddrinfo").is_none());
        assert!(ProbeDescriptor::parse("uprobe/").is_none());
    }

    #[test]
    fn test_for_program_targets_section_function() {
        let probe = ProbeDescriptor::for_program(
            "ret_addrinfo",
            Some("uretprobe/getaddrinfo"),
            ProbeKind::Uretprobe,
        );
        assert_eq!(probe.program, "ret_addrinfo");
        assert_eq!(probe.raw_name, "uretprobe/getaddrinfo");
        assert_eq!(probe.kind, ProbeKind::Uretprobe);
        assert_eq!(probe.target_function, "getaddrinfo");
    }

    #[test]
    fn test_for_program_composes_raw_name_for_bare_section() {
        let probe =
            ProbeDescriptor::for_program("getaddrinfo", Some("uretprobe"), ProbeKind::Uretprobe);
        assert_eq!(probe.program, "getaddrinfo");
        assert_eq!(probe.raw_name, "uretprobe/getaddrinfo");
        assert_eq!(probe.target_function, "getaddrinfo");

        let probe = ProbeDescriptor::for_program("uprobe/gethostbyname", None, ProbeKind::Uprobe);
        assert_eq!(probe.program, "uprobe/gethostbyname");
        assert_eq!(probe.target_function, "gethostbyname");
    }

    #[test]
    fn test_program_sections_maps_functions() {
        let data = bpf_object(&[
            ("uprobe/getaddrinfo", "addrinfo"),
            ("uretprobe/getaddrinfo", "ret_addrinfo"),
        ]);

        let sections = program_sections(&data).unwrap();

        assert_eq!(sections["addrinfo"], "uprobe/getaddrinfo");
        assert_eq!(sections["ret_addrinfo"], "uretprobe/getaddrinfo");
    }

    #[test]
    fn test_program_sections_rejects_garbage() {
        assert!(program_sections(b"not an object file").is_err());
    }

    #[test]
    fn test_declared_programs_target_section_function() {
        let data = bpf_object(&[
            ("uprobe/getaddrinfo", "addrinfo"),
            ("uretprobe/getaddrinfo", "ret_addrinfo"),
        ]);
        let bpf = Ebpf::load(&data).unwrap();
        let sections = program_sections(&data).unwrap();

        let declared = declared_probes(&bpf, &sections);

        assert_eq!(declared.len(), 2);
        assert_eq!(declared[0].raw_name, "uprobe/getaddrinfo");
        assert_eq!(declared[0].program, "addrinfo");
        assert_eq!(declared[0].kind, ProbeKind::Uprobe);
        assert_eq!(declared[1].raw_name, "uretprobe/getaddrinfo");
        assert_eq!(declared[1].program, "ret_addrinfo");
        assert_eq!(declared[1].kind, ProbeKind::Uretprobe);
        assert!(declared.iter().all(|p| p.target_function == "getaddrinfo"));
    }
}
