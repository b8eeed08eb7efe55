//! Partition table type from `parted <disk> print`

/// Extract the label type from the `Partition Table: <type>` line
pub fn parse_partition_table(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key == "Partition Table").then(|| value.trim().to_string())
        })
        .last()
}
