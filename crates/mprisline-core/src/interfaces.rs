//! Static description of the MPRIS interfaces exported on the bus.
//!
//! The tables drive three things: argument and property type checks in the
//! D-Bus adapter, the interface tag sent to the client in each intent line,
//! and the introspection document.

use std::fmt::Write as _;

/// Well-known bus name prefix; the application name is appended.
pub const BUS_NAME_PREFIX: &str = "org.mpris.MediaPlayer2";

/// Object path every MPRIS interface lives on.
pub const OBJECT_PATH: &str = "/org/mpris/MediaPlayer2";

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
pub const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

impl Access {
    pub fn is_writable(self) -> bool {
        matches!(self, Access::ReadWrite)
    }

    fn as_xml(self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::ReadWrite => "readwrite",
        }
    }
}

/// A named, typed method or signal argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arg {
    pub name: &'static str,
    pub signature: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: &'static str,
    pub args: &'static [Arg],
}

impl MethodSpec {
    /// Concatenated input signature, e.g. `ox` for `SetPosition`.
    pub fn input_signature(&self) -> String {
        self.args.iter().map(|a| a.signature).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySpec {
    pub name: &'static str,
    pub signature: &'static str,
    pub access: Access,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalSpec {
    pub name: &'static str,
    pub args: &'static [Arg],
}

/// One MPRIS interface and the tag that names it on the line protocol.
#[derive(Debug, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub name: &'static str,
    pub tag: &'static str,
    pub methods: &'static [MethodSpec],
    pub properties: &'static [PropertySpec],
    pub signals: &'static [SignalSpec],
}

impl InterfaceSpec {
    pub fn method(&self, name: &str) -> Option<&'static MethodSpec> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&'static PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn signal(&self, name: &str) -> Option<&'static SignalSpec> {
        self.signals.iter().find(|s| s.name == name)
    }
}

const fn method(name: &'static str, args: &'static [Arg]) -> MethodSpec {
    MethodSpec { name, args }
}

const fn arg(name: &'static str, signature: &'static str) -> Arg {
    Arg { name, signature }
}

const fn ro(name: &'static str, signature: &'static str) -> PropertySpec {
    PropertySpec {
        name,
        signature,
        access: Access::Read,
    }
}

const fn rw(name: &'static str, signature: &'static str) -> PropertySpec {
    PropertySpec {
        name,
        signature,
        access: Access::ReadWrite,
    }
}

/// `org.mpris.MediaPlayer2`, tagged `base`.
pub static ROOT: InterfaceSpec = InterfaceSpec {
    name: "org.mpris.MediaPlayer2",
    tag: "base",
    methods: &[method("Raise", &[]), method("Quit", &[])],
    properties: &[
        ro("CanQuit", "b"),
        rw("Fullscreen", "b"),
        ro("CanSetFullscreen", "b"),
        ro("CanRaise", "b"),
        ro("HasTrackList", "b"),
        ro("Identity", "s"),
        ro("DesktopEntry", "s"),
        ro("SupportedUriSchemes", "as"),
        ro("SupportedMimeTypes", "as"),
    ],
    signals: &[],
};

/// `org.mpris.MediaPlayer2.Player`, tagged `player`.
pub static PLAYER: InterfaceSpec = InterfaceSpec {
    name: "org.mpris.MediaPlayer2.Player",
    tag: "player",
    methods: &[
        method("Next", &[]),
        method("Previous", &[]),
        method("Pause", &[]),
        method("PlayPause", &[]),
        method("Stop", &[]),
        method("Play", &[]),
        method("Seek", &[arg("Offset", "x")]),
        method("SetPosition", &[arg("TrackId", "o"), arg("Position", "x")]),
        method("OpenUri", &[arg("Uri", "s")]),
    ],
    properties: &[
        ro("PlaybackStatus", "s"),
        rw("LoopStatus", "s"),
        rw("Rate", "d"),
        rw("Shuffle", "b"),
        ro("Metadata", "a{sv}"),
        rw("Volume", "d"),
        ro("Position", "x"),
        ro("MinimumRate", "d"),
        ro("MaximumRate", "d"),
        ro("CanGoNext", "b"),
        ro("CanGoPrevious", "b"),
        ro("CanPlay", "b"),
        ro("CanPause", "b"),
        ro("CanSeek", "b"),
        ro("CanControl", "b"),
    ],
    signals: &[SignalSpec {
        name: "Seeked",
        args: &[arg("Position", "x")],
    }],
};

/// Every MPRIS interface, in export order.
pub static MPRIS_INTERFACES: [&InterfaceSpec; 2] = [&ROOT, &PLAYER];

/// Look up an MPRIS interface by its bus name.
pub fn interface(name: &str) -> Option<&'static InterfaceSpec> {
    MPRIS_INTERFACES.iter().copied().find(|i| i.name == name)
}

const STANDARD_INTERFACES_XML: &str = r#"  <interface name="org.freedesktop.DBus.Properties">
    <method name="Get">
      <arg name="interface_name" type="s" direction="in"/>
      <arg name="property_name" type="s" direction="in"/>
      <arg name="value" type="v" direction="out"/>
    </method>
    <method name="GetAll">
      <arg name="interface_name" type="s" direction="in"/>
      <arg name="properties" type="a{sv}" direction="out"/>
    </method>
    <method name="Set">
      <arg name="interface_name" type="s" direction="in"/>
      <arg name="property_name" type="s" direction="in"/>
      <arg name="value" type="v" direction="in"/>
    </method>
    <signal name="PropertiesChanged">
      <arg name="interface_name" type="s"/>
      <arg name="changed_properties" type="a{sv}"/>
      <arg name="invalidated_properties" type="as"/>
    </signal>
  </interface>
  <interface name="org.freedesktop.DBus.Introspectable">
    <method name="Introspect">
      <arg name="xml_data" type="s" direction="out"/>
    </method>
  </interface>
  <interface name="org.freedesktop.DBus.Peer">
    <method name="Ping"/>
  </interface>
"#;

/// Introspection document for [`OBJECT_PATH`].
pub fn introspection_xml() -> String {
    let mut xml = String::from(
        "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n \
         \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n<node>\n",
    );
    xml.push_str(STANDARD_INTERFACES_XML);

    for iface in MPRIS_INTERFACES {
        // Writing into a String cannot fail.
        let _ = writeln!(xml, "  <interface name=\"{}\">", iface.name);
        for m in iface.methods {
            if m.args.is_empty() {
                let _ = writeln!(xml, "    <method name=\"{}\"/>", m.name);
                continue;
            }
            let _ = writeln!(xml, "    <method name=\"{}\">", m.name);
            for a in m.args {
                let _ = writeln!(
                    xml,
                    "      <arg name=\"{}\" type=\"{}\" direction=\"in\"/>",
                    a.name, a.signature
                );
            }
            xml.push_str("    </method>\n");
        }
        for s in iface.signals {
            let _ = writeln!(xml, "    <signal name=\"{}\">", s.name);
            for a in s.args {
                let _ = writeln!(xml, "      <arg name=\"{}\" type=\"{}\"/>", a.name, a.signature);
            }
            xml.push_str("    </signal>\n");
        }
        for p in iface.properties {
            let _ = writeln!(
                xml,
                "    <property name=\"{}\" type=\"{}\" access=\"{}\"/>",
                p.name,
                p.signature,
                p.access.as_xml()
            );
        }
        xml.push_str("  </interface>\n");
    }
    xml.push_str("</node>\n");
    xml
}
