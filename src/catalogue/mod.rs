/*!
Data interfaces ("catalogues"): the components that discover which dump
files exist and are relevant to the configured filters.

All variants share one contract: `refresh` enumerates newly relevant
files, pushes them into the input queue, and reports how many it pushed.
Zero means "nothing new right now" (the façade decides whether to sleep
or finish); an error is fatal for the stream.

Variant selection is a runtime registry keyed by name (`broker`,
`singlefile`, `csvfile`, `sqlite`), configured with string
`(option, value)` pairs before `start`.
*/
pub mod broker;
pub mod csvfile;
pub mod singlefile;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use broker::BrokerCatalogue;
pub use csvfile::CsvFileCatalogue;
pub use singlefile::SingleFileCatalogue;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCatalogue;

use crate::error::BgpStreamError;
use crate::filter::FilterStore;
use crate::input::InputQueue;

/// A selectable data interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataInterfaceInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// A configurable option of a data interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataInterfaceOption {
    pub name: &'static str,
    pub description: &'static str,
}

/// Every interface this build knows about; the first is the default.
pub fn data_interfaces() -> &'static [DataInterfaceInfo] {
    &[
        DataInterfaceInfo {
            name: "broker",
            description: "Retrieve metadata information from the BGPStream broker service",
        },
        DataInterfaceInfo {
            name: "singlefile",
            description: "Read a single mrt data file (a RIB and/or an update)",
        },
        DataInterfaceInfo {
            name: "csvfile",
            description: "Retrieve metadata information from a csv file",
        },
        #[cfg(feature = "sqlite")]
        DataInterfaceInfo {
            name: "sqlite",
            description: "Retrieve metadata information from a sqlite database",
        },
    ]
}

/// The options a given interface accepts, or None for unknown names.
pub fn data_interface_options(name: &str) -> Option<&'static [DataInterfaceOption]> {
    match name {
        "broker" => Some(&[
            DataInterfaceOption {
                name: "url",
                description: "Broker URL (default: https://bgpstream.caida.org/broker)",
            },
            DataInterfaceOption {
                name: "param",
                description: "Additional broker GET parameter (repeatable)",
            },
        ]),
        "singlefile" => Some(&[
            DataInterfaceOption {
                name: "rib-file",
                description: "rib mrt file to read",
            },
            DataInterfaceOption {
                name: "upd-file",
                description: "updates mrt file to read",
            },
        ]),
        "csvfile" => Some(&[DataInterfaceOption {
            name: "csv-file",
            description: "csv file listing the mrt data to read",
        }]),
        #[cfg(feature = "sqlite")]
        "sqlite" => Some(&[DataInterfaceOption {
            name: "db-file",
            description: "sqlite database file",
        }]),
        _ => None,
    }
}

/// Is `name` a selectable interface in this build?
pub fn is_data_interface(name: &str) -> bool {
    data_interfaces().iter().any(|i| i.name == name)
}

/// The active catalogue, one variant per data interface.
pub enum Catalogue {
    Broker(BrokerCatalogue),
    SingleFile(SingleFileCatalogue),
    CsvFile(CsvFileCatalogue),
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteCatalogue),
}

impl Catalogue {
    /// Builds the catalogue selected by `name` from the configured
    /// `(option, value)` pairs. Fails on unknown names, unknown options
    /// and unusable backing files.
    pub fn build(
        name: &str,
        options: &[(String, String)],
        filters: &FilterStore,
    ) -> Result<Catalogue, BgpStreamError> {
        for (option, _) in options {
            let known = data_interface_options(name)
                .map(|opts| opts.iter().any(|o| o.name == option))
                .unwrap_or(false);
            if !known {
                return Err(BgpStreamError::ConfigError(format!(
                    "invalid option '{option}' for data interface '{name}'"
                )));
            }
        }
        match name {
            "broker" => Ok(Catalogue::Broker(BrokerCatalogue::new(options, filters))),
            "singlefile" => Ok(Catalogue::SingleFile(SingleFileCatalogue::new(options))),
            "csvfile" => Ok(Catalogue::CsvFile(CsvFileCatalogue::new(options)?)),
            #[cfg(feature = "sqlite")]
            "sqlite" => Ok(Catalogue::Sqlite(SqliteCatalogue::new(options, filters)?)),
            _ => Err(BgpStreamError::ConfigError(format!(
                "invalid data interface name '{name}'"
            ))),
        }
    }

    /// Enumerates newly relevant dump files into the queue. Returns the
    /// number of inputs pushed; errors are fatal for the stream.
    pub fn refresh(
        &mut self,
        queue: &mut InputQueue,
        filters: &FilterStore,
    ) -> Result<usize, BgpStreamError> {
        match self {
            Catalogue::Broker(c) => c.refresh(queue),
            Catalogue::SingleFile(c) => c.refresh(queue),
            Catalogue::CsvFile(c) => c.refresh(queue, filters),
            #[cfg(feature = "sqlite")]
            Catalogue::Sqlite(c) => c.refresh(queue, filters),
        }
    }
}
