//! Pre-built mock host layouts for testing.

use super::filesystem::MockFs;

/// Uid of the `postgres` account in [`MockFs::debian_host`].
pub const POSTGRES_UID: u32 = 113;

impl MockFs {
    /// A Debian-style host with two clusters under `/var/lib/postgresql/13`:
    ///
    /// - `main` on 5432, a primary, lock file in `/var/run/postgresql`
    /// - `replica` on 5433, a streaming replica with `recovery.conf`,
    ///   lock file in `/tmp`
    pub fn debian_host() -> Self {
        let mut fs = Self::new();

        fs.add_file(
            "/etc/passwd",
            "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
postgres:x:113:120:PostgreSQL administrator:/var/lib/postgresql:/bin/bash
",
        );

        fs.add_data_directory("/var/lib/postgresql/13/main", "13");
        fs.add_lock_file(
            "/var/run/postgresql",
            5432,
            "/var/lib/postgresql/13/main",
            POSTGRES_UID,
        );

        fs.add_data_directory("/var/lib/postgresql/13/replica", "13");
        fs.add_file(
            "/var/lib/postgresql/13/replica/recovery.conf",
            "\
standby_mode = 'on'
primary_conninfo = 'host=10.0.0.5 port=5433 user=replicator application_name=replica'
recovery_target_timeline = 'latest'
",
        );
        fs.add_lock_file("/tmp", 5433, "/var/lib/postgresql/13/replica", POSTGRES_UID);

        fs
    }
}
