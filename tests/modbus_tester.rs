mod common;

use ipx_config_lib::config::ModbusSettings;
use ipx_config_lib::modbus::{ModbusError, ModbusLimits, ModbusTester};
use ipx_config_lib::serial::{ScriptedPort, SerialInterface};

use common::{read_reply, script_measurement, with_crc};

fn tester(port: &ScriptedPort) -> ModbusTester {
    let settings = ModbusSettings {
        baud_rate: 9600,
        timeout_ms: 100,
        settle_ms: 0,
    };
    ModbusTester::new(SerialInterface::from_io(Box::new(port.clone())), &settings)
}

#[test]
fn passing_measurement() {
    let port = ScriptedPort::new();
    script_measurement(&port, 3, 1, -99.0, 21.5, 12.0);
    let mut tester = tester(&port);

    let record = tester.run_full_test(2001, 3).unwrap();
    assert!(record.overall_pass, "{}", record.errors);
    assert_eq!(record.alias, 3);
    assert_eq!(record.status, 1);
    assert_eq!(record.temperature_c, 21.5);

    let frames = port.written_frames();
    assert_eq!(frames.len(), 5);
    // write single register 0x0063 = 0xFFFF
    assert_eq!(&frames[0][..6], &[3, 0x06, 0x00, 0x63, 0xFF, 0xFF]);
    // read one register at 0x0135
    assert_eq!(&frames[1][..6], &[3, 0x03, 0x01, 0x35, 0x00, 0x01]);
}

#[test]
fn out_of_range_voltage_fails_the_record() {
    let port = ScriptedPort::new();
    script_measurement(&port, 1, 1, -99.0, 21.5, 13.1);
    let mut tester = tester(&port);

    let record = tester.run_full_test(2002, 1).unwrap();
    assert!(!record.overall_pass);
    assert!(!record.voltage_pass);
    assert!(record.errors.contains("Voltage"));
}

#[test]
fn bench_limits_can_be_tightened() {
    let port = ScriptedPort::new();
    script_measurement(&port, 4, 1, -99.0, 35.0, 12.0);
    let mut tester = tester(&port).with_limits(ModbusLimits {
        temperature_c: (15.0, 30.0),
        ..ModbusLimits::default()
    });

    let record = tester.run_full_test(2003, 4).unwrap();
    assert!(!record.overall_pass);
    assert!(!record.temperature_pass);
    assert!(record.voltage_pass);
}

#[test]
fn response_split_across_reads() {
    let port = ScriptedPort::new();
    let frame = read_reply(5, &[0x1234, 0x5678]);
    port.reply_bytes_next(vec![frame[..4].to_vec(), frame[4..].to_vec()]);
    let mut tester = tester(&port);

    assert_eq!(tester.read_registers(5, 0x0136, 2).unwrap(), vec![0x1234, 0x5678]);
}

#[test]
fn exception_reply_is_an_error() {
    let port = ScriptedPort::new();
    port.reply_bytes_next(vec![with_crc(vec![5, 0x83, 0x02])]);
    let mut tester = tester(&port);

    assert!(matches!(
        tester.read_registers(5, 0x0136, 2),
        Err(ModbusError::Frame(_))
    ));
}

#[test]
fn silent_sensor_times_out() {
    let port = ScriptedPort::new();
    let mut tester = tester(&port);
    assert!(matches!(
        tester.read_registers(5, 0x0135, 1),
        Err(ModbusError::Timeout { alias: 5, register: 0x0135 })
    ));
}

#[test]
fn alias_outside_modbus_range_is_rejected() {
    let port = ScriptedPort::new();
    let mut tester = tester(&port);
    assert!(matches!(
        tester.datalogger_test(2001, 0),
        Err(ModbusError::InvalidAlias(0))
    ));
    assert!(matches!(
        tester.datalogger_test(2001, 300),
        Err(ModbusError::InvalidAlias(300))
    ));
    assert!(port.written_frames().is_empty());
}
