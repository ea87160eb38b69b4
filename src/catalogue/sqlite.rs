/*!
The sqlite catalogue: same manifest model as the csvfile variant, but
backed by a database with normalised collector / type tables.

The query is a fixed join over `bgp_data`, `collectors`, `bgp_types`
and `time_span`, with the project / collector / type / interval filters
folded into the WHERE clause at build time and the admission window
`(last_ts, now - 1s]` bound per refresh.
*/
use crate::error::BgpStreamError;
use crate::filter::FilterStore;
use crate::input::{InputFile, InputQueue};
use crate::models::DumpType;
use log::warn;
use rusqlite::{params, Connection, OpenFlags};

pub struct SqliteCatalogue {
    conn: Connection,
    query: String,
    current_ts: u32,
}

impl SqliteCatalogue {
    pub fn new(
        options: &[(String, String)],
        filters: &FilterStore,
    ) -> Result<SqliteCatalogue, BgpStreamError> {
        let mut path = None;
        for (option, value) in options {
            if option == "db-file" {
                path = Some(value.clone());
            }
        }
        let path = path.ok_or_else(|| {
            BgpStreamError::ConfigError("sqlite interface requires the db-file option".to_string())
        })?;
        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| BgpStreamError::CatalogueError(format!("cannot open {path}: {e}")))?;
        let query = build_query(filters);
        // fail at start rather than on the first refresh
        conn.prepare(&query)?;
        Ok(SqliteCatalogue {
            conn,
            query,
            current_ts: 0,
        })
    }

    pub fn refresh(
        &mut self,
        queue: &mut InputQueue,
        _filters: &FilterStore,
    ) -> Result<usize, BgpStreamError> {
        let last_ts = self.current_ts;
        // we always ask for rows at least one second old
        self.current_ts = (chrono::Utc::now().timestamp() - 1) as u32;

        let mut stmt = self.conn.prepare(&self.query)?;
        let rows = stmt.query_map(params![last_ts, self.current_ts], |row| {
            Ok((
                row.get::<_, String>(0)?, // file path
                row.get::<_, String>(1)?, // project
                row.get::<_, String>(2)?, // collector
                row.get::<_, String>(3)?, // type
                row.get::<_, u32>(4)?,    // time span
                row.get::<_, u32>(5)?,    // file time
            ))
        })?;

        let mut num_results = 0;
        for row in rows {
            let (path, project, collector, type_name, time_span, file_time) = row?;
            let dump_type = match DumpType::from_kind_str(&type_name) {
                Some(t) => t,
                None => {
                    warn!("skipping row with unknown dump type '{type_name}'");
                    continue;
                }
            };
            let pushed = queue.push_sorted(InputFile {
                path,
                project,
                collector,
                dump_type,
                file_time,
                time_span,
            });
            if pushed {
                num_results += 1;
            }
        }
        Ok(num_results)
    }
}

fn quoted_in_list<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<String>>()
        .join(", ")
}

fn build_query(filters: &FilterStore) -> String {
    let mut query = String::from(
        "SELECT bgp_data.file_path, collectors.project, collectors.name, \
         bgp_types.name, time_span.time_span, bgp_data.file_time, bgp_data.ts \
         FROM collectors JOIN bgp_data JOIN bgp_types JOIN time_span \
         WHERE bgp_data.collector_id = collectors.id AND \
         bgp_data.collector_id = time_span.collector_id AND \
         bgp_data.type_id = bgp_types.id AND \
         bgp_data.type_id = time_span.bgp_type_id",
    );

    if !filters.projects().is_empty() {
        let mut projects: Vec<&str> = filters.projects().iter().map(String::as_str).collect();
        projects.sort_unstable();
        query.push_str(&format!(
            " AND collectors.project IN ({})",
            quoted_in_list(projects.into_iter())
        ));
    }
    if !filters.collectors().is_empty() {
        let mut collectors: Vec<&str> = filters.collectors().iter().map(String::as_str).collect();
        collectors.sort_unstable();
        query.push_str(&format!(
            " AND collectors.name IN ({})",
            quoted_in_list(collectors.into_iter())
        ));
    }
    if !filters.dump_types().is_empty() {
        let mut types: Vec<&str> = filters
            .dump_types()
            .iter()
            .map(|t| t.as_kind_str())
            .collect();
        types.sort_unstable();
        query.push_str(&format!(
            " AND bgp_types.name IN ({})",
            quoted_in_list(types.into_iter())
        ));
    }
    if !filters.intervals().is_empty() {
        // ribs and updates occasionally carry a file time just before
        // the window they belong to; slacken the begin by one span
        // plus 120 seconds, like the csv variant
        let clauses: Vec<String> = filters
            .intervals()
            .iter()
            .map(|i| {
                let mut clause = format!(
                    "(bgp_data.file_time >= {} - time_span.time_span - 120",
                    i.begin
                );
                if !i.is_live() {
                    clause.push_str(&format!(" AND bgp_data.file_time <= {}", i.end));
                }
                clause.push(')');
                clause
            })
            .collect();
        query.push_str(&format!(" AND ({})", clauses.join(" OR ")));
    }

    query.push_str(" AND bgp_data.ts > ?1 AND bgp_data.ts <= ?2");
    query.push_str(" ORDER BY file_time, bgp_types.name");
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterKind;

    fn seeded_db(rows: &[(&str, &str, &str, &str, u32, u32, u32)]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE collectors (id INTEGER PRIMARY KEY, project TEXT, name TEXT);
             CREATE TABLE bgp_types (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE time_span (collector_id INTEGER, bgp_type_id INTEGER, time_span INTEGER,
                                     UNIQUE (collector_id, bgp_type_id));
             CREATE TABLE bgp_data (collector_id INTEGER, type_id INTEGER,
                                    file_path TEXT, file_time INTEGER, ts INTEGER);
             INSERT INTO bgp_types (id, name) VALUES (1, 'ribs'), (2, 'updates');",
        )
        .unwrap();
        let mut next_collector = 1;
        for (path, project, collector, type_name, file_time, time_span, ts) in rows {
            let type_id = if *type_name == "ribs" { 1 } else { 2 };
            let collector_id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM collectors WHERE project = ?1 AND name = ?2",
                    params![project, collector],
                    |row| row.get(0),
                )
                .ok();
            let collector_id = match collector_id {
                Some(id) => id,
                None => {
                    conn.execute(
                        "INSERT INTO collectors (id, project, name) VALUES (?1, ?2, ?3)",
                        params![next_collector, project, collector],
                    )
                    .unwrap();
                    next_collector += 1;
                    next_collector - 1
                }
            };
            conn.execute(
                "INSERT OR IGNORE INTO time_span (collector_id, bgp_type_id, time_span)
                 VALUES (?1, ?2, ?3)",
                params![collector_id, type_id, time_span],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO bgp_data (collector_id, type_id, file_path, file_time, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![collector_id, type_id, path, file_time, ts],
            )
            .unwrap();
        }
        file
    }

    fn catalogue_for(file: &tempfile::NamedTempFile, filters: &FilterStore) -> SqliteCatalogue {
        SqliteCatalogue::new(
            &[(
                "db-file".to_string(),
                file.path().to_str().unwrap().to_string(),
            )],
            filters,
        )
        .unwrap()
    }

    #[test]
    fn test_requires_option() {
        let filters = FilterStore::new();
        assert!(SqliteCatalogue::new(&[], &filters).is_err());
    }

    #[test]
    fn test_rows_pushed() {
        let db = seeded_db(&[
            ("/data/ribs.100.gz", "ris", "rrc06", "ribs", 100, 120, 50),
            ("/data/updates.100.gz", "ris", "rrc06", "updates", 100, 120, 50),
        ]);
        let filters = FilterStore::new();
        let mut catalogue = catalogue_for(&db, &filters);
        let mut queue = InputQueue::new();
        assert_eq!(catalogue.refresh(&mut queue, &filters).unwrap(), 2);
        let batch = queue.take_ready_batch();
        assert_eq!(batch[0].dump_type, DumpType::Rib);
    }

    #[test]
    fn test_admission_window_advances() {
        let db = seeded_db(&[(
            "/data/updates.100.gz",
            "ris",
            "rrc06",
            "updates",
            100,
            120,
            50,
        )]);
        let filters = FilterStore::new();
        let mut catalogue = catalogue_for(&db, &filters);
        let mut queue = InputQueue::new();
        assert_eq!(catalogue.refresh(&mut queue, &filters).unwrap(), 1);
        queue.take_ready_batch();
        // rows stamped before the advanced window are not re-admitted
        assert_eq!(catalogue.refresh(&mut queue, &filters).unwrap(), 0);
    }

    #[test]
    fn test_project_filter_in_query() {
        let db = seeded_db(&[
            ("/data/updates.a.gz", "ris", "rrc06", "updates", 100, 120, 50),
            (
                "/data/updates.b.gz",
                "routeviews",
                "route-views2",
                "updates",
                100,
                120,
                50,
            ),
        ]);
        let mut filters = FilterStore::new();
        filters.add(FilterKind::Project, "ris").unwrap();
        let mut catalogue = catalogue_for(&db, &filters);
        let mut queue = InputQueue::new();
        assert_eq!(catalogue.refresh(&mut queue, &filters).unwrap(), 1);
        assert_eq!(queue.take_ready_batch()[0].project, "ris");
    }

    #[test]
    fn test_interval_filter_in_query() {
        let db = seeded_db(&[
            ("/data/updates.in.gz", "ris", "rrc06", "updates", 5000, 120, 50),
            ("/data/updates.out.gz", "ris", "rrc06", "updates", 90000, 120, 50),
        ]);
        let mut filters = FilterStore::new();
        filters.add_interval(4000, 6000);
        let mut catalogue = catalogue_for(&db, &filters);
        let mut queue = InputQueue::new();
        assert_eq!(catalogue.refresh(&mut queue, &filters).unwrap(), 1);
        assert_eq!(queue.take_ready_batch()[0].path, "/data/updates.in.gz");
    }
}
